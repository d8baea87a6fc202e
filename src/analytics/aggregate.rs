//! Per-group first/last aggregates over a windowed view.
//!
//! Groups are sorted by `captured_at` before anything is computed, so the
//! view's own row order does not matter. Groups with no rows in the view
//! never appear in the output, and output is ordered by group key.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::WindowedView;
use crate::db::models::Snapshot;

/// What rows are grouped by.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GroupKey {
    #[default]
    Entity,
    /// A text attribute such as `channel_title`. Rows without it are left out.
    Attribute(String),
}

impl GroupKey {
    fn of<'a>(&self, snapshot: &'a Snapshot) -> Option<&'a str> {
        match self {
            GroupKey::Entity => Some(snapshot.entity_key.as_str()),
            GroupKey::Attribute(name) => snapshot.attribute(name),
        }
    }
}

/// First/last values of one metric for one group within a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub group: String,
    pub metric: String,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    pub samples: usize,
    /// Metric of the earliest row; `None` if that row lacks it.
    pub first_value: Option<f64>,
    /// Metric of the latest row; `None` if that row lacks it.
    pub last_value: Option<f64>,
    pub delta: Option<f64>,
    /// `delta / first_value * 100`. `None` when the baseline is zero or
    /// missing.
    pub percent_change: Option<f64>,
}

/// Per-group statistics over every row of the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub group: String,
    pub metric: String,
    pub samples: usize,
    pub latest: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub range: Option<f64>,
}

/// One charted point: the value and its change since the group's previous row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub group: String,
    pub captured_at: DateTime<Utc>,
    pub value: Option<f64>,
    pub delta: Option<f64>,
}

/// Percent change from `first` to `last`, in percent units.
pub fn percent_change(first: Option<f64>, last: Option<f64>) -> Option<f64> {
    let (first, last) = (first?, last?);
    if first == 0.0 || !first.is_finite() || !last.is_finite() {
        return None;
    }
    Some((last - first) / first * 100.0)
}

/// Rows of the view grouped by `key`, each group in `captured_at` order.
fn groups<'a>(view: &'a WindowedView, key: &GroupKey) -> BTreeMap<&'a str, Vec<&'a Snapshot>> {
    let mut groups: BTreeMap<&str, Vec<&Snapshot>> = BTreeMap::new();
    for row in &view.rows {
        if let Some(group) = key.of(row) {
            groups.entry(group).or_default().push(row);
        }
    }
    for rows in groups.values_mut() {
        rows.sort_by_key(|s| s.captured_at);
    }
    groups
}

pub fn aggregate(view: &WindowedView, key: &GroupKey, metric: &str) -> Vec<AggregateRow> {
    groups(view, key)
        .into_iter()
        .filter_map(|(group, rows)| {
            let first = rows.first()?;
            let last = rows.last()?;
            let first_value = first.metric(metric);
            let last_value = last.metric(metric);

            Some(AggregateRow {
                group: group.to_string(),
                metric: metric.to_string(),
                first_at: first.captured_at,
                last_at: last.captured_at,
                samples: rows.len(),
                first_value,
                last_value,
                delta: first_value.zip(last_value).map(|(f, l)| l - f),
                percent_change: percent_change(first_value, last_value),
            })
        })
        .collect()
}

/// Latest row of each group.
pub fn latest_per_group(view: &WindowedView, key: &GroupKey) -> Vec<Snapshot> {
    groups(view, key)
        .into_values()
        .filter_map(|rows| rows.last().map(|s| (*s).clone()))
        .collect()
}

pub fn summarize(view: &WindowedView, key: &GroupKey, metric: &str) -> Vec<GroupStats> {
    groups(view, key)
        .into_iter()
        .map(|(group, rows)| {
            let values: Vec<f64> = rows.iter().filter_map(|s| s.metric(metric)).collect();
            let min = values.iter().copied().reduce(f64::min);
            let max = values.iter().copied().reduce(f64::max);

            GroupStats {
                group: group.to_string(),
                metric: metric.to_string(),
                samples: rows.len(),
                latest: rows.last().and_then(|s| s.metric(metric)),
                min,
                max,
                range: min.zip(max).map(|(lo, hi)| hi - lo),
            }
        })
        .collect()
}

/// Every row as a chart point, grouped then time-ordered. The first point of
/// each group, and any point next to a missing value, has no delta.
pub fn delta_series(view: &WindowedView, key: &GroupKey, metric: &str) -> Vec<SeriesPoint> {
    let mut points = Vec::with_capacity(view.rows.len());
    for (group, rows) in groups(view, key) {
        let mut previous: Option<f64> = None;
        for row in rows {
            let value = row.metric(metric);
            points.push(SeriesPoint {
                group: group.to_string(),
                captured_at: row.captured_at,
                value,
                delta: previous.zip(value).map(|(p, v)| v - p),
            });
            previous = value;
        }
    }
    points
}
