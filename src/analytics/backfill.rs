use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::db::models::Snapshot;
use crate::utils::hour_floor;

pub const BACKFILL_ATTRIBUTE: &str = "is_backfill";

/// Hourly, forward-filled series per entity.
///
/// For each entity, one row is emitted per whole hour between its first and
/// last snapshot. Each row copies the latest snapshot at or before that hour
/// and carries `is_backfill = "1"` unless a snapshot was taken exactly on the
/// hour. Output is ordered by entity, then time.
pub fn resample_hourly(rows: &[Snapshot]) -> Vec<Snapshot> {
    let mut by_entity: BTreeMap<&str, Vec<&Snapshot>> = BTreeMap::new();
    for row in rows {
        by_entity.entry(row.entity_key.as_str()).or_default().push(row);
    }

    let mut out = Vec::new();
    for rows in by_entity.values_mut() {
        rows.sort_by_key(|s| s.captured_at);
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            continue;
        };

        let mut hour = hour_ceil(&first.captured_at);
        let end = hour_floor(&last.captured_at);
        let mut cursor = 0;

        while hour <= end {
            while cursor + 1 < rows.len() && rows[cursor + 1].captured_at <= hour {
                cursor += 1;
            }
            let source = rows[cursor];

            let mut filled = source.clone();
            filled.captured_at = hour;
            if source.captured_at != hour {
                filled
                    .attributes
                    .insert(BACKFILL_ATTRIBUTE.to_string(), "1".to_string());
            }
            out.push(filled);

            hour += TimeDelta::hours(1);
        }
    }
    out
}

fn hour_ceil(ts: &DateTime<Utc>) -> DateTime<Utc> {
    let floor = hour_floor(ts);
    if floor == *ts {
        floor
    } else {
        floor + TimeDelta::hours(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn snap(entity: &str, h: u32, m: u32, value: f64) -> Snapshot {
        Snapshot::new(entity, at(h, m)).with_metric("followers", value)
    }

    #[test]
    fn test_forward_fills_each_hour() {
        let rows = vec![snap("A", 1, 30, 10.0), snap("A", 4, 10, 40.0)];
        let out = resample_hourly(&rows);

        let times: Vec<_> = out.iter().map(|s| s.captured_at).collect();
        assert_eq!(times, vec![at(2, 0), at(3, 0), at(4, 0)]);

        let values: Vec<_> = out.iter().map(|s| s.metric("followers")).collect();
        assert_eq!(values, vec![Some(10.0), Some(10.0), Some(10.0)]);
        assert!(out.iter().all(|s| s.attribute(BACKFILL_ATTRIBUTE) == Some("1")));
    }

    #[test]
    fn test_on_the_hour_rows_are_not_marked() {
        let rows = vec![
            snap("A", 3, 0, 30.0),
            snap("A", 1, 0, 10.0),
            snap("B", 1, 15, 5.0),
        ];
        let out = resample_hourly(&rows);

        let a: Vec<_> = out.iter().filter(|s| s.entity_key == "A").collect();
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].attribute(BACKFILL_ATTRIBUTE), None);
        assert_eq!(a[1].attribute(BACKFILL_ATTRIBUTE), Some("1"));
        assert_eq!(a[1].metric("followers"), Some(10.0));
        assert_eq!(a[2].attribute(BACKFILL_ATTRIBUTE), None);
        assert_eq!(a[2].metric("followers"), Some(30.0));

        // B never crosses an hour boundary.
        assert!(out.iter().all(|s| s.entity_key != "B"));
    }

    #[test]
    fn test_empty_input() {
        assert!(resample_hourly(&[]).is_empty());
    }
}
