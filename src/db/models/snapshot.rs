use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::minute_key;

/// One observation of one entity at one instant.
///
/// Population: ingestion runs, one per entity per fetch.
///
/// Query Patterns:
///   - "Followers of artist X over the last 72h"
///   - "Latest subscribers per channel"
///
/// A metric that was not observed is absent from `metrics`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_key: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new(entity_key: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            entity_key: entity_key.into(),
            captured_at,
            metrics: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Attribute value, treating an empty string as absent.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `(entity_key, minute)`: at most one snapshot per key survives an upsert.
    pub fn dedup_key(&self) -> (&str, i64) {
        (&self.entity_key, minute_key(&self.captured_at))
    }
}
