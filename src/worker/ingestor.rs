use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{error, warn};

use super::SnapshotSource;
use crate::config::{RetrySettings, Settings};
use crate::db::models::{DomainRunStats, LogSchema, Snapshot};
use crate::db::SnapshotStore;
use crate::utils::with_retry;

/// Pulls records from a source into one domain's log, then applies
/// retention.
///
/// A store failure aborts the domain with an error; a source failure only
/// marks that entity as failed.
#[derive(Clone)]
pub struct Ingestor {
    store: SnapshotStore,
    retry: RetrySettings,
    retention_days: u32,
}

impl Ingestor {
    pub fn new(store: SnapshotStore, retry: RetrySettings, retention_days: u32) -> Self {
        Self {
            store,
            retry,
            retention_days,
        }
    }

    pub fn from_settings(store: SnapshotStore, settings: &Settings) -> Self {
        Self::new(store, settings.retry.clone(), settings.retention.days)
    }

    pub async fn run_domain(
        &self,
        schema: &LogSchema,
        source: &dyn SnapshotSource,
        entities: &[String],
    ) -> Result<DomainRunStats> {
        self.run_domain_at(schema, source, entities, Utc::now()).await
    }

    /// [`Ingestor::run_domain`] with an explicit clock for retention.
    pub async fn run_domain_at(
        &self,
        schema: &LogSchema,
        source: &dyn SnapshotSource,
        entities: &[String],
        now: DateTime<Utc>,
    ) -> Result<DomainRunStats> {
        let mut stats = DomainRunStats::new(&schema.name);
        let mut snapshots: Vec<Snapshot> = Vec::new();

        for entity in entities {
            let label = format!("[{}] fetch {} from {}", schema.name, entity, source.name());
            let records = match with_retry(&self.retry, &label, || source.fetch(entity)).await {
                Ok(records) => records,
                Err(e) => {
                    error!("{:#}", e);
                    stats.failed_entities.push(entity.clone());
                    continue;
                },
            };

            stats.fetched_entities += 1;
            for record in records {
                match record.into_snapshot() {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => {
                        warn!("[{}] rejected record for {}: {}", schema.name, entity, e);
                        stats.rejected_records += 1;
                    },
                }
            }
        }

        let store = self.store.clone();
        let schema = schema.clone();
        let retention_days = self.retention_days;
        let (upserted, rolled) = tokio::task::spawn_blocking(move || {
            let upserted = if snapshots.is_empty() {
                None
            } else {
                Some(store.upsert(&schema, &snapshots)?)
            };
            let rolled = store.roll(&schema, retention_days, now)?;
            Ok::<_, anyhow::Error>((upserted, rolled))
        })
        .await
        .context("store task panicked")??;

        stats.rows_written = upserted.map(|u| u.added()).unwrap_or(0);
        stats.kept = rolled.kept;
        stats.archived = rolled.archived;
        Ok(stats)
    }
}
