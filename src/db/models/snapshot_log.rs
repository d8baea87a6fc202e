use std::path::PathBuf;

use rustc_hash::FxHashSet;

use super::Snapshot;

/// Column layout of one domain's log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSchema {
    pub name: String,
    /// File name relative to the store's data directory.
    pub file: PathBuf,
    pub entity_column: String,
    pub timestamp_column: String,
    pub metrics: Vec<String>,
}

impl LogSchema {
    pub fn new(
        name: impl Into<String>,
        file: impl Into<PathBuf>,
        entity_column: impl Into<String>,
        timestamp_column: impl Into<String>,
        metrics: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            entity_column: entity_column.into(),
            timestamp_column: timestamp_column.into(),
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// File name without extension, used to name archive partitions.
    pub fn stem(&self) -> String {
        self.file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn is_metric(&self, column: &str) -> bool {
        self.metrics.iter().any(|m| m == column)
    }
}

/// Every readable row of one domain's active log, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotLog {
    pub domain: String,
    pub snapshots: Vec<Snapshot>,
    /// Rows dropped while reading (wrong field count, bad timestamp, ...).
    pub skipped_rows: usize,
}

impl SnapshotLog {
    pub fn new(domain: impl Into<String>, snapshots: Vec<Snapshot>) -> Self {
        Self {
            domain: domain.into(),
            snapshots,
            skipped_rows: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Distinct entity keys in first-seen order.
    pub fn entities(&self) -> Vec<&str> {
        let mut seen = FxHashSet::default();
        self.snapshots
            .iter()
            .map(|s| s.entity_key.as_str())
            .filter(|key| seen.insert(*key))
            .collect()
    }
}
