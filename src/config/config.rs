use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::db::models::LogSchema;

/// Where the active logs, archive partitions and run ledger live.
///
/// Relative `archive_dir`, `processed_dir` and `ledger_file` paths are
/// resolved against `data_dir`. Inbox files land in `processed_dir` once
/// ingested.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_ledger_file")]
    pub ledger_file: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed")
}

fn default_ledger_file() -> PathBuf {
    PathBuf::from("runs.log")
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            archive_dir: default_archive_dir(),
            processed_dir: default_processed_dir(),
            ledger_file: default_ledger_file(),
        }
    }
}

impl StorageSettings {
    pub fn archive_path(&self) -> PathBuf {
        resolve(&self.data_dir, &self.archive_dir)
    }

    pub fn processed_path(&self) -> PathBuf {
        resolve(&self.data_dir, &self.processed_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        resolve(&self.data_dir, &self.ledger_file)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Longest retention horizon accepted, in days (100 years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest alert window accepted, in hours (10 years).
pub const MAX_WINDOW_HOURS: i64 = 87_600;

/// Retention horizon: rows older than `days` move to the archive.
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionSettings {
    #[serde(default = "default_retention_days")]
    pub days: u32,
}

fn default_retention_days() -> u32 {
    90
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
        }
    }
}

/// Alert evaluation window and threshold.
///
/// `threshold_pct` is in percent units: `20.0` alerts on a change of
/// 20% or more in either direction.
#[derive(Debug, Deserialize, Clone)]
pub struct AlertSettings {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_threshold_pct")]
    pub threshold_pct: f64,
}

fn default_window_hours() -> i64 {
    72
}

fn default_threshold_pct() -> f64 {
    20.0
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            threshold_pct: default_threshold_pct(),
        }
    }
}

/// Loaded-log cache configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_capacity() -> u64 {
    64
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_capacity: default_cache_capacity(),
        }
    }
}

/// Bounded retry for source fetches.
///
/// Delay before attempt `n + 1` is `base_delay_ms * 2^n`.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Job intervals for the scheduler.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSettings {
    #[serde(default = "default_ingest_interval")]
    pub ingest_interval_secs: u64,
    #[serde(default = "default_alert_interval")]
    pub alert_interval_secs: u64,
}

fn default_ingest_interval() -> u64 {
    3_600
}

fn default_alert_interval() -> u64 {
    900
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            ingest_interval_secs: default_ingest_interval(),
            alert_interval_secs: default_alert_interval(),
        }
    }
}

/// One independent snapshot log (artist stats, top tracks, channel stats...).
#[derive(Debug, Deserialize, Clone)]
pub struct DomainSettings {
    pub name: String,
    /// Log file name, relative to `storage.data_dir`.
    pub file: PathBuf,
    pub entity_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// Numeric columns. Every other column is carried as a text attribute.
    pub metrics: Vec<String>,
    /// Metrics evaluated by the alert job. Empty disables alerts for the domain.
    #[serde(default)]
    pub alert_metrics: Vec<String>,
    /// JSON-lines drop file the ingestion job reads raw records from.
    #[serde(default)]
    pub inbox: Option<PathBuf>,
    /// Entities to ingest. Empty means every entity found in the inbox.
    #[serde(default)]
    pub entities: Vec<String>,
}

fn default_timestamp_column() -> String {
    "timestamp".to_string()
}

impl DomainSettings {
    pub fn schema(&self) -> LogSchema {
        LogSchema {
            name: self.name.clone(),
            file: self.file.clone(),
            entity_column: self.entity_column.clone(),
            timestamp_column: self.timestamp_column.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn inbox_path(&self, storage: &StorageSettings) -> Option<PathBuf> {
        self.inbox
            .as_ref()
            .map(|inbox| resolve(&storage.data_dir, inbox))
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `CHARTPULSE__SECTION__KEY`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub domains: Vec<DomainSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("CHARTPULSE").separator("__"))
            .build()?;

        Self::from_config(s)
    }

    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn domain(&self, name: &str) -> Option<&DomainSettings> {
        self.domains.iter().find(|d| d.name == name)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_RETENTION_DAYS).contains(&self.retention.days) {
            return Err(invalid(format!(
                "retention.days must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.alerts.window_hours) {
            return Err(invalid(format!(
                "alerts.window_hours must be between 1 and {}",
                MAX_WINDOW_HOURS
            )));
        }
        if !self.alerts.threshold_pct.is_finite() || self.alerts.threshold_pct < 0.0 {
            return Err(invalid("alerts.threshold_pct must be a non-negative number"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }

        let mut names = FxHashSet::default();
        for domain in &self.domains {
            if !names.insert(domain.name.as_str()) {
                return Err(invalid(format!("duplicate domain name {:?}", domain.name)));
            }
            if domain.metrics.is_empty() {
                return Err(invalid(format!(
                    "domain {:?} declares no metrics",
                    domain.name
                )));
            }
            if domain.entity_column == domain.timestamp_column {
                return Err(invalid(format!(
                    "domain {:?}: entity and timestamp columns must differ",
                    domain.name
                )));
            }
            if let Some(metric) = domain
                .alert_metrics
                .iter()
                .find(|m| !domain.metrics.contains(m))
            {
                return Err(invalid(format!(
                    "domain {:?}: alert metric {:?} is not a declared metric",
                    domain.name, metric
                )));
            }
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Message(msg.into())
}
