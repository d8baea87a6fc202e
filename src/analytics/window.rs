use chrono::{DateTime, TimeDelta, Utc};

use crate::db::models::{Snapshot, SnapshotLog};

/// Rows of a log whose `captured_at` lies in `[start, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedView {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// In the same relative order as the log.
    pub rows: Vec<Snapshot>,
    /// Size of the log the view was cut from.
    pub source_rows: usize,
}

/// Lets presentation tell "nothing collected yet" from "nothing recent".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewStatus {
    NoData,
    NoRowsInWindow,
    Rows(usize),
}

impl WindowedView {
    pub fn status(&self) -> ViewStatus {
        match (self.source_rows, self.rows.len()) {
            (0, _) => ViewStatus::NoData,
            (_, 0) => ViewStatus::NoRowsInWindow,
            (_, n) => ViewStatus::Rows(n),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Trailing window of `hours` ending at `now`, inclusive at both ends.
///
/// A span reaching past the earliest representable time starts the window
/// there, so every row up to `now` is in it.
pub fn window(log: &SnapshotLog, hours: i64, now: DateTime<Utc>) -> WindowedView {
    let start = TimeDelta::try_hours(hours.max(0))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    window_between(&log.snapshots, start, now)
}

pub fn window_between(rows: &[Snapshot], start: DateTime<Utc>, end: DateTime<Utc>) -> WindowedView {
    WindowedView {
        start,
        end,
        rows: rows
            .iter()
            .filter(|s| s.captured_at >= start && s.captured_at <= end)
            .cloned()
            .collect(),
        source_rows: rows.len(),
    }
}
