//! Job to pull new snapshots into every configured domain.
//!
//! Claims each domain's inbox, upserts into its log, rolls old rows into the
//! archive and appends one record to the run ledger. Readers are invalidated
//! for every domain touched.

use std::time::Instant;

use anyhow::{Error, Result};
use chrono::Utc;
use log::{error, info, warn};

use crate::config::{DomainSettings, Settings};
use crate::db::models::{DomainRunStats, RunRecord, RunStatus};
use crate::db::Storage;
use crate::worker::{InboxSource, Ingestor, SnapshotSource};

const JOB_NAME: &str = "ingest";

/// Runs one ingestion pass over all domains.
///
/// A store failure stops the pass: it is recorded in the ledger as
/// [`RunStatus::Failed`] and returned. A source that cannot be read fails
/// only its own domain, and the pass reports [`RunStatus::Partial`].
pub async fn run(storage: &Storage, settings: &Settings) -> Result<RunRecord> {
    info!("Starting ingest job...");

    let start = Instant::now();
    let ingestor = Ingestor::from_settings(storage.store.clone(), settings);
    let mut domains = Vec::with_capacity(settings.domains.len());
    let mut failure = None;

    for domain in &settings.domains {
        let outcome = ingest_domain(&ingestor, domain, settings).await;
        storage.cache.invalidate(&domain.name).await;

        match outcome {
            Ok(Some(stats)) => domains.push(stats),
            Ok(None) => {},
            Err(e) => {
                error!("[{}] ingestion aborted: {:#}", domain.name, e);
                failure = Some(e);
                break;
            },
        }
    }

    let record = RunRecord {
        ts: Utc::now(),
        component: JOB_NAME.to_string(),
        status: if failure.is_some() {
            RunStatus::Failed
        } else {
            RunRecord::status_for(&domains)
        },
        domains,
        duration_s: start.elapsed().as_secs_f64(),
        error: failure.as_ref().map(|e| format!("{:#}", e)),
    };

    if let Err(e) = storage.ledger.record(&record) {
        warn!("Failed to append run to ledger: {}", e);
    }

    if let Some(e) = failure {
        return Err(e);
    }

    info!(
        "Completed ingest job in {:?} ({:?}, {} rows, {} failed entities)",
        start.elapsed(),
        record.status,
        record.rows_written(),
        record.failed_entities()
    );
    Ok(record)
}

/// `None` when the domain has no inbox configured.
///
/// Records for entities outside a non-empty `entities` list are consumed
/// with the claimed file and not ingested.
async fn ingest_domain(
    ingestor: &Ingestor,
    domain: &DomainSettings,
    settings: &Settings,
) -> Result<Option<DomainRunStats>> {
    let Some(inbox) = domain.inbox_path(&settings.storage) else {
        return Ok(None);
    };

    let processed = settings.storage.processed_path();
    let source = match InboxSource::claim(&domain.name, inbox, &processed, Utc::now()).await {
        Ok(source) => source,
        Err(e) => return Ok(Some(source_failed(domain, e))),
    };

    let entities = if domain.entities.is_empty() {
        match source.entities().await {
            Ok(entities) => entities,
            Err(e) => {
                release(&source).await;
                return Ok(Some(source_failed(domain, e)));
            },
        }
    } else {
        domain.entities.clone()
    };
    if entities.is_empty() {
        info!("[{}] nothing to ingest from {:?}", domain.name, source.path());
    }

    match ingestor.run_domain(&domain.schema(), &source, &entities).await {
        Ok(stats) => {
            if let Some(claimed) = source.claimed_path() {
                info!("[{}] inbox processed into {:?}", domain.name, claimed);
            }
            Ok(Some(stats))
        },
        Err(e) => {
            release(&source).await;
            Err(e)
        },
    }
}

fn source_failed(domain: &DomainSettings, e: Error) -> DomainRunStats {
    error!("[{}] source unavailable: {:#}", domain.name, e);
    DomainRunStats {
        failed_entities: domain.entities.clone(),
        error: Some(format!("{:#}", e)),
        ..DomainRunStats::new(&domain.name)
    }
}

async fn release(source: &InboxSource) {
    if let Err(e) = source.release().await {
        warn!("[{}] could not return inbox records: {:#}", source.name(), e);
    }
}
