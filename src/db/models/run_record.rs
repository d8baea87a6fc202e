use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// Every entity fetched and rows were written.
    Ok,
    /// Nothing to write.
    NoOp,
    /// Some entities or a domain's source failed; the rest were written.
    Partial,
    /// A store write failed; the run was aborted.
    Failed,
}

/// Per-domain counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainRunStats {
    pub domain: String,
    pub fetched_entities: usize,
    #[serde(default)]
    pub failed_entities: Vec<String>,
    /// Raw records dropped for unparsable timestamps.
    pub rejected_records: usize,
    /// Rows the log gained, after dedup against what it already held.
    pub rows_written: usize,
    pub kept: usize,
    pub archived: usize,
    /// Set when the domain's source could not be read at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainRunStats {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }
}

/// One line of the run ledger (`runs.log`).
///
/// Only used for display ("last fetch at ..."); the pipeline never reads it
/// back into its computations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub ts: DateTime<Utc>,
    pub component: String,
    pub status: RunStatus,
    #[serde(default)]
    pub domains: Vec<DomainRunStats>,
    pub duration_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn rows_written(&self) -> usize {
        self.domains.iter().map(|d| d.rows_written).sum()
    }

    pub fn failed_entities(&self) -> usize {
        self.domains.iter().map(|d| d.failed_entities.len()).sum()
    }

    /// Status from per-domain counters. Store failures are reported separately
    /// as [`RunStatus::Failed`].
    pub fn status_for(domains: &[DomainRunStats]) -> RunStatus {
        let failed: usize = domains
            .iter()
            .map(|d| d.failed_entities.len() + usize::from(d.error.is_some()))
            .sum();
        let written: usize = domains.iter().map(|d| d.rows_written).sum();

        match (failed, written) {
            (0, 0) => RunStatus::NoOp,
            (0, _) => RunStatus::Ok,
            _ => RunStatus::Partial,
        }
    }
}
