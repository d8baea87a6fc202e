pub mod analytics;
pub mod config;
pub mod cron;
pub mod db;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use cron::{CronScheduler, CronSettings};
pub use db::Storage;
pub use worker::{InboxSource, Ingestor, SnapshotSource};
