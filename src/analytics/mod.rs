//! Read-side computations over a loaded snapshot log.
//!
//! - [`window`] - Trailing time window over a log
//! - [`aggregate`] - First/last aggregates, summaries and chart series
//! - [`alerts`] - Threshold alerts on percent change
//! - [`backfill`] - Hourly forward-filled resampling
//! - [`report`] - Per-domain report combining the above
//!
//! Nothing here touches the filesystem.

mod aggregate;
mod alerts;
mod backfill;
mod report;
mod window;

pub use aggregate::{
    aggregate, delta_series, latest_per_group, percent_change, summarize, AggregateRow,
    GroupKey, GroupStats, SeriesPoint,
};
pub use alerts::{evaluate, AlertMessage};
pub use backfill::{resample_hourly, BACKFILL_ATTRIBUTE};
pub use report::{DomainReport, ReportSettings, ReportStatus};
pub use window::{window, window_between, ViewStatus, WindowedView};
