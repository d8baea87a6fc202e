use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::warn;

use super::models::RunRecord;
use super::StoreError;

/// JSON-lines history of ingestion runs (`runs.log`).
#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single line.
    pub fn record(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io(&self.path, e))?;

        Ok(())
    }

    /// Every parsable record, oldest first. Unparsable lines are skipped.
    pub fn history(&self) -> Result<Vec<RunRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        let records = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(idx, line)| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("{}:{}: skipping ledger line: {}", self.path.display(), idx + 1, e);
                    None
                },
            })
            .collect();

        Ok(records)
    }

    /// Most recent run, for "last fetch at ..." displays.
    pub fn last_run(&self) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.history()?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DomainRunStats, RunStatus};
    use chrono::{TimeZone, Utc};

    fn record(hour: u32, status: RunStatus) -> RunRecord {
        RunRecord {
            ts: Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap(),
            component: "ingest".to_string(),
            status,
            domains: vec![DomainRunStats {
                rows_written: 3,
                ..DomainRunStats::new("youtube_channels")
            }],
            duration_s: 1.25,
            error: None,
        }
    }

    #[test]
    fn test_last_run_of_missing_ledger() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(tmp.path().join("runs.log"));
        assert_eq!(ledger.last_run().unwrap(), None);
    }

    #[test]
    fn test_records_append_and_corrupt_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = RunLedger::new(tmp.path().join("logs/runs.log"));

        ledger.record(&record(10, RunStatus::Ok)).unwrap();
        // a writer killed mid-line
        fs::OpenOptions::new()
            .append(true)
            .open(ledger.path())
            .unwrap()
            .write_all(b"{\"ts\":\"2024-05-01T1\n")
            .unwrap();
        ledger.record(&record(11, RunStatus::Partial)).unwrap();

        let history = ledger.history().unwrap();
        assert_eq!(history.len(), 2);

        let last = ledger.last_run().unwrap().unwrap();
        assert_eq!(last.status, RunStatus::Partial);
        assert_eq!(last.rows_written(), 3);
        assert_eq!(last.ts, Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_status_serializes_kebab_case() {
        let line = serde_json::to_string(&record(10, RunStatus::NoOp)).unwrap();
        assert!(line.contains("\"status\":\"no-op\""));
        assert!(!line.contains("\"error\""));
    }
}
