use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::debug;
use moka::future::Cache;

use super::models::{LogSchema, SnapshotLog};
use super::SnapshotStore;
use crate::config::CacheSettings;

/// Loaded logs keyed by domain name.
///
/// Entries expire after the configured TTL; writers call
/// [`LogCache::invalidate`] for the domains they touched so the next read
/// sees the new file without waiting for expiry.
#[derive(Clone)]
pub struct LogCache {
    store: SnapshotStore,
    logs: Cache<String, Arc<SnapshotLog>>,
}

impl LogCache {
    pub fn new(store: SnapshotStore, settings: &CacheSettings) -> Self {
        let logs = Cache::builder()
            .max_capacity(settings.max_capacity)
            .time_to_live(Duration::from_secs(settings.ttl_secs))
            .build();

        Self { store, logs }
    }

    /// Cached log for `schema`, read through the store on a miss.
    pub async fn get(&self, schema: &LogSchema) -> Result<Arc<SnapshotLog>> {
        let store = self.store.clone();
        let load_schema = schema.clone();

        self.logs
            .try_get_with(schema.name.clone(), async move {
                debug!("Loading log {:?} from disk", load_schema.name);
                let log = tokio::task::spawn_blocking(move || store.read(&load_schema))
                    .await
                    .context("log reader task panicked")??;
                Ok::<_, anyhow::Error>(Arc::new(log))
            })
            .await
            .map_err(|e| anyhow!("failed to load log {:?}: {:#}", schema.name, e))
    }

    pub async fn invalidate(&self, domain: &str) {
        self.logs.invalidate(domain).await;
    }

    pub fn invalidate_all(&self) {
        self.logs.invalidate_all();
    }

    pub fn contains(&self, domain: &str) -> bool {
        self.logs.contains_key(domain)
    }
}
