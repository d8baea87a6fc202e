//! Cron scheduler for the periodic jobs.
//!
//! Runs:
//! - Ingestion from every domain's inbox into its snapshot log
//! - Percent-change alert evaluation over the cached logs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::{ScheduleSettings, Settings};
use crate::db::Storage;

use super::jobs;

/// Cron scheduler that manages the periodic jobs.
pub struct CronScheduler {
    storage: Arc<Storage>,
    settings: Arc<Settings>,
    cron: CronSettings,
    /// Held for the duration of an ingestion pass. At most one writer runs.
    ingest_lock: Arc<Mutex<()>>,
}

/// Configuration for cron job intervals
#[derive(Debug, Clone)]
pub struct CronSettings {
    /// Interval for ingestion passes - default 1 hour
    pub ingest_interval_secs: u64,
    /// Interval for alert evaluation - default 15 minutes
    pub alert_interval_secs: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        ScheduleSettings::default().into()
    }
}

impl From<ScheduleSettings> for CronSettings {
    fn from(schedule: ScheduleSettings) -> Self {
        Self {
            ingest_interval_secs: schedule.ingest_interval_secs,
            alert_interval_secs: schedule.alert_interval_secs,
        }
    }
}

impl CronScheduler {
    pub fn new(storage: Arc<Storage>, settings: Arc<Settings>) -> Self {
        let cron = CronSettings::from(settings.schedule.clone());
        Self {
            storage,
            settings,
            cron,
            ingest_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Starts the cron scheduler and runs until cancellation.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<()> {
        let mut scheduler = JobScheduler::new().await?;

        self.register_ingest_job(&scheduler).await?;
        self.register_alerts_job(&scheduler).await?;

        scheduler.start().await?;
        info!("Cron scheduler started with {} jobs", 2);

        cancellation_token.cancelled().await;
        info!("Cron scheduler shutting down...");

        // Let a running ingestion pass finish its write.
        let _guard = self.ingest_lock.lock().await;
        scheduler.shutdown().await?;
        Ok(())
    }

    async fn register_ingest_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let storage = self.storage.clone();
        let settings = self.settings.clone();
        let lock = self.ingest_lock.clone();
        let interval = self.cron.ingest_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let storage = storage.clone();
            let settings = settings.clone();
            let lock = lock.clone();
            Box::pin(async move {
                let Ok(_guard) = lock.try_lock() else {
                    warn!("Previous ingest still running, skipping this tick");
                    return;
                };
                if let Err(e) = jobs::ingest::run(&storage, &settings).await {
                    error!("Failed to ingest snapshots: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered ingest job (every {}s)", interval);
        Ok(())
    }

    async fn register_alerts_job(&self, scheduler: &JobScheduler) -> Result<()> {
        let storage = self.storage.clone();
        let settings = self.settings.clone();
        let interval = self.cron.alert_interval_secs;

        let job = Job::new_repeated_async(Duration::from_secs(interval), move |_uuid, _lock| {
            let storage = storage.clone();
            let settings = settings.clone();
            Box::pin(async move {
                if let Err(e) = jobs::alerts::run(&storage, &settings).await {
                    error!("Failed to evaluate alerts: {:#}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
        info!("Registered alerts job (every {}s)", interval);
        Ok(())
    }
}
