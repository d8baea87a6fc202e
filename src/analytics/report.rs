use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{aggregate, evaluate, latest_per_group, window, AggregateRow, AlertMessage, GroupKey};
use crate::config::{AlertSettings, DomainSettings};
use crate::db::models::{Snapshot, SnapshotLog};

/// What a report looks at.
#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub window_hours: i64,
    pub threshold_pct: f64,
    /// Metrics aggregated and checked for alerts.
    pub metrics: Vec<String>,
    pub group: GroupKey,
}

impl ReportSettings {
    /// Alert metrics of a domain, grouped per entity.
    pub fn for_domain(domain: &DomainSettings, alerts: &AlertSettings) -> Self {
        Self {
            window_hours: alerts.window_hours,
            threshold_pct: alerts.threshold_pct,
            metrics: domain.alert_metrics.clone(),
            group: GroupKey::Entity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
    NoData,
    NoRowsInWindow,
    Ok,
}

/// Everything a dashboard or the alert job needs for one domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainReport {
    pub domain: String,
    pub generated_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub status: ReportStatus,
    pub rows_in_window: usize,
    pub skipped_rows: usize,
    pub aggregates: Vec<AggregateRow>,
    pub alerts: Vec<AlertMessage>,
    pub latest: Vec<Snapshot>,
}

impl DomainReport {
    pub fn build(log: &SnapshotLog, settings: &ReportSettings, now: DateTime<Utc>) -> Self {
        let view = window(log, settings.window_hours, now);

        let status = if log.is_empty() {
            ReportStatus::NoData
        } else if view.is_empty() {
            ReportStatus::NoRowsInWindow
        } else {
            ReportStatus::Ok
        };

        let aggregates: Vec<AggregateRow> = settings
            .metrics
            .iter()
            .flat_map(|metric| aggregate(&view, &settings.group, metric))
            .collect();
        let alerts = evaluate(&aggregates, settings.threshold_pct);

        Self {
            domain: log.domain.clone(),
            generated_at: now,
            window_start: view.start,
            status,
            rows_in_window: view.rows.len(),
            skipped_rows: log.skipped_rows,
            latest: latest_per_group(&view, &settings.group),
            aggregates,
            alerts,
        }
    }
}
