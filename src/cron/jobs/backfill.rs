//! One-off job writing an hourly, forward-filled copy of every domain's log.
//!
//! The copy lands beside the log as `<stem>_backfilled.csv` and is rewritten
//! on each run. Active logs are only read.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::analytics::resample_hourly;
use crate::config::Settings;
use crate::db::Storage;

/// Backfill output of one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillFile {
    pub domain: String,
    pub path: PathBuf,
    pub rows: usize,
}

/// Resamples every domain with data. Domains with an empty log are skipped.
pub fn run(storage: &Storage, settings: &Settings) -> Result<Vec<BackfillFile>> {
    info!("Starting backfill job...");

    let mut files = Vec::new();
    for domain in &settings.domains {
        let schema = domain.schema();
        let log = storage
            .store
            .read(&schema)
            .with_context(|| format!("Failed to read {}", domain.name))?;
        if log.is_empty() {
            info!("[{}] no data to backfill", domain.name);
            continue;
        }

        let rows = resample_hourly(&log.snapshots);
        let path = storage
            .store
            .write_backfill(&schema, &rows)
            .with_context(|| format!("Failed to write backfill for {}", domain.name))?;

        info!(
            "[{}] wrote {} hourly rows from {} snapshots to {}",
            domain.name,
            rows.len(),
            log.len(),
            path.display()
        );
        files.push(BackfillFile {
            domain: domain.name.clone(),
            path,
            rows: rows.len(),
        });
    }

    Ok(files)
}
