//! Timestamp normalization.
//!
//! Every instant that enters a log goes through [`normalize`]. Logs written
//! by older collectors carry a mix of formats (`2024-05-01 12:00:00`,
//! `2024-05-01T12:00:00Z`, `2024-05-01 12:00:00+00:00`, ...). All of them
//! end up as second-precision UTC and are persisted with
//! [`CANONICAL_FORMAT`], whose textual order is chronological order.
//!
//! Inputs without an offset are taken to already be UTC wall-clock time,
//! never local time.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, TimeZone, Utc};
use thiserror::Error;

/// `2024-05-01T12:00:00Z`
pub const CANONICAL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats carrying an explicit offset. `%.f` also matches no fraction.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,
    #[error("unparsable timestamp {0:?}")]
    Unparsable(String),
}

/// Parses `raw` into a second-precision UTC instant.
pub fn normalize(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(TimestampError::Empty);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(normalize_datetime(&dt));
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(normalize_datetime(&dt));
        }
    }

    let naive = strip_utc_designator(s);
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Ok(Utc.from_utc_datetime(&dt).trunc_subsecs(0));
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&midnight));
    }

    Err(TimestampError::Unparsable(s.to_string()))
}

/// Converts an already-structured instant to second-precision UTC.
pub fn normalize_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> DateTime<Utc> {
    dt.with_timezone(&Utc).trunc_subsecs(0)
}

pub fn to_canonical(ts: &DateTime<Utc>) -> String {
    ts.format(CANONICAL_FORMAT).to_string()
}

/// Minutes since the epoch, floored. Two instants in the same wall-clock
/// minute share a key.
pub fn minute_key(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(60)
}

/// Start of the hour containing `ts`.
pub fn hour_floor(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(3_600), 0).unwrap_or(*ts)
}

fn strip_utc_designator(s: &str) -> &str {
    s.strip_suffix('Z')
        .or_else(|| s.strip_suffix('z'))
        .or_else(|| s.strip_suffix(" UTC"))
        .map(str::trim_end)
        .unwrap_or(s)
}
