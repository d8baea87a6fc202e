#[allow(clippy::module_inception)]
mod config;

pub use self::config::{
    AlertSettings, CacheSettings, DomainSettings, RetentionSettings,
    RetrySettings, ScheduleSettings, Settings, StorageSettings,
};
