//! Job to evaluate percent-change alerts for every domain.
//!
//! Reads through the log cache, so it never blocks on a concurrent
//! ingestion write. Alerts are delivered to the log.

use anyhow::Result;
use chrono::Utc;
use log::{info, warn};

use crate::analytics::{DomainReport, ReportSettings, ReportStatus};
use crate::config::Settings;
use crate::db::Storage;

/// Builds a report per domain with alert metrics and logs each alert.
/// Returns every report built; a domain whose log cannot be read is skipped.
pub async fn run(storage: &Storage, settings: &Settings) -> Result<Vec<DomainReport>> {
    info!("Starting alerts job...");

    let start = std::time::Instant::now();
    let now = Utc::now();
    let mut reports = Vec::new();

    for domain in settings.domains.iter().filter(|d| !d.alert_metrics.is_empty()) {
        let log = match storage.cache.get(&domain.schema()).await {
            Ok(log) => log,
            Err(e) => {
                warn!("[{}] skipping alerts: {:#}", domain.name, e);
                continue;
            },
        };

        let report = DomainReport::build(
            &log,
            &ReportSettings::for_domain(domain, &settings.alerts),
            now,
        );

        match report.status {
            ReportStatus::NoData => info!("[{}] no data collected yet", domain.name),
            ReportStatus::NoRowsInWindow => info!(
                "[{}] no rows in the last {}h",
                domain.name, settings.alerts.window_hours
            ),
            ReportStatus::Ok => {
                for alert in &report.alerts {
                    warn!("[{}] {} {}", domain.name, alert.metric, alert);
                }
            },
        }
        if report.skipped_rows > 0 {
            warn!(
                "[{}] {} malformed rows ignored",
                domain.name, report.skipped_rows
            );
        }

        reports.push(report);
    }

    info!(
        "Completed alerts job in {:?} ({} domains, {} alerts)",
        start.elapsed(),
        reports.len(),
        reports.iter().map(|r| r.alerts.len()).sum::<usize>()
    );
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Snapshot;
    use chrono::TimeDelta;
    use config::{Config, File, FileFormat};
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        let yaml = format!(
            r#"
storage:
  data_dir: {}
domains:
  - name: spotify_artists
    file: spotify_stats.csv
    entity_column: artist_id
    metrics: [followers, popularity]
    alert_metrics: [followers]
  - name: youtube_channels
    file: youtube_channel_stats.csv
    entity_column: channel_id
    metrics: [subs]
    alert_metrics: [subs]
  - name: spotify_tracks
    file: spotify_top_tracks.csv
    entity_column: track_id
    metrics: [popularity]
"#,
            dir.path().display()
        );
        let config = Config::builder()
            .add_source(File::from_str(&yaml, FileFormat::Yaml))
            .build()
            .unwrap();
        Settings::from_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_alerts_per_domain() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let storage = Storage::new(&settings);

        let now = Utc::now();
        let schema = settings.domain("spotify_artists").unwrap().schema();
        storage
            .store
            .upsert(
                &schema,
                &[
                    Snapshot::new("A", now - TimeDelta::hours(5)).with_metric("followers", 100.0),
                    Snapshot::new("A", now - TimeDelta::hours(1)).with_metric("followers", 150.0),
                    Snapshot::new("B", now - TimeDelta::hours(5)).with_metric("followers", 100.0),
                    Snapshot::new("B", now - TimeDelta::hours(1)).with_metric("followers", 101.0),
                ],
            )
            .unwrap();

        let reports = run(&storage, &settings).await.unwrap();
        assert_eq!(reports.len(), 2);

        let spotify = &reports[0];
        assert_eq!(spotify.status, ReportStatus::Ok);
        assert_eq!(spotify.alerts.len(), 1);
        assert_eq!(spotify.alerts[0].text, "A: +50.000%");

        let youtube = &reports[1];
        assert_eq!(youtube.status, ReportStatus::NoData);
        assert!(youtube.alerts.is_empty());
    }
}
