use std::collections::BTreeMap;

use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::models::Snapshot;
use crate::utils::{normalize, TimestampError};

/// A record as a source hands it over, before normalization.
///
/// `captured_at` may be in any format [`normalize`] accepts. A `null` metric
/// means "not observed" and is dropped rather than stored as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity_key: String,
    pub captured_at: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, Option<f64>>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record has an empty entity key")]
    EmptyEntity,
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

impl RawRecord {
    pub fn into_snapshot(self) -> Result<Snapshot, RecordError> {
        let entity_key = self.entity_key.trim();
        if entity_key.is_empty() {
            return Err(RecordError::EmptyEntity);
        }

        let mut snapshot = Snapshot::new(entity_key, normalize(&self.captured_at)?);
        snapshot.metrics = self
            .metrics
            .into_iter()
            .filter_map(|(name, value)| value.filter(|v| v.is_finite()).map(|v| (name, v)))
            .collect();
        snapshot.attributes = self
            .attributes
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        Ok(snapshot)
    }
}

/// Where an ingestion run gets its records from.
///
/// Implementations do their own I/O; the ingestor wraps every
/// [`SnapshotSource::fetch`] in bounded retry.
pub trait SnapshotSource: Send + Sync {
    fn name(&self) -> &str;

    /// Entities this source can serve, used when a domain lists none.
    fn entities(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn fetch<'a>(&'a self, entity: &'a str) -> BoxFuture<'a, Result<Vec<RawRecord>>>;
}
