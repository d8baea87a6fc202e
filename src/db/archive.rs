//! Retention: moves rows older than the horizon out of the active log into
//! dated archive partitions.

use std::path::PathBuf;

use chrono::{DateTime, TimeDelta, Utc};
use log::info;

use super::codec;
use super::models::LogSchema;
use super::{SnapshotStore, StoreError};

/// Result of one [`SnapshotStore::roll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollSummary {
    pub kept: usize,
    pub archived: usize,
}

impl SnapshotStore {
    /// Archive partition for rows rolled out on `now`'s (UTC) date:
    /// `<archive_dir>/<log stem>_<YYYYMMDD>.csv`.
    pub fn archive_path(&self, schema: &LogSchema, now: DateTime<Utc>) -> PathBuf {
        self.archive_dir()
            .join(format!("{}_{}.csv", schema.stem(), now.format("%Y%m%d")))
    }

    /// Splits the log at `now - retention_days`.
    ///
    /// Rows at or after the cutoff are written back as the active log (full
    /// overwrite). Older rows are appended to today's archive partition,
    /// which accumulates across same-day runs. An empty log, or one whose
    /// header has no timestamp column, is left alone and reports `(0, 0)`.
    /// A horizon past the earliest representable time archives nothing.
    pub fn roll(
        &self,
        schema: &LogSchema,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<RollSummary, StoreError> {
        let path = self.log_path(schema);
        let loaded = codec::read_log(&path, schema)?;

        if !loaded.has_required_columns || loaded.snapshots.is_empty() {
            return Ok(RollSummary::default());
        }

        let cutoff = TimeDelta::try_days(i64::from(retention_days))
            .and_then(|horizon| now.checked_sub_signed(horizon))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let (keep, old): (Vec<_>, Vec<_>) = loaded
            .snapshots
            .into_iter()
            .partition(|s| s.captured_at >= cutoff);

        // Archive first: a failure after this point leaves rows duplicated
        // in the archive rather than lost.
        if !old.is_empty() {
            let archive_path = self.archive_path(schema, now);
            let archived = codec::read_log(&archive_path, schema)?;

            let mut rows = archived.snapshots;
            rows.extend(old.iter().cloned());
            codec::write_log(&archive_path, schema, &rows, &archived.attribute_columns)?;

            info!(
                "[{}] archived {} rows older than {} to {}",
                schema.name,
                old.len(),
                cutoff.format("%Y-%m-%d"),
                archive_path.display()
            );
        }

        if !old.is_empty() || loaded.skipped_rows > 0 {
            codec::write_log(&path, schema, &keep, &loaded.attribute_columns)?;
        }

        Ok(RollSummary {
            kept: keep.len(),
            archived: old.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Snapshot;
    use chrono::TimeZone;

    fn schema() -> LogSchema {
        LogSchema::new(
            "youtube_channels",
            "youtube_channel_stats.csv",
            "channel_id",
            "timestamp",
            &["subs", "views"],
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap()
    }

    fn daily_rows(days: i64) -> Vec<Snapshot> {
        (0..days)
            .map(|d| {
                Snapshot::new("UC123", now() - TimeDelta::days(d) - TimeDelta::hours(1))
                    .with_metric("subs", (1_000 + d) as f64)
            })
            .collect()
    }

    #[test]
    fn test_roll_partitions_at_retention_horizon() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), tmp.path().join("archive"));
        store.append(&schema(), &daily_rows(120)).unwrap();

        let summary = store.roll(&schema(), 90, now()).unwrap();

        // days 0..=89 are inside the horizon, 90..120 are older
        assert_eq!(summary, RollSummary { kept: 90, archived: 30 });
        assert_eq!(summary.kept + summary.archived, 120);

        let cutoff = now() - TimeDelta::days(90);
        let active = store.read(&schema()).unwrap();
        assert_eq!(active.len(), 90);
        assert!(active.snapshots.iter().all(|s| s.captured_at >= cutoff));

        let archive = store.archive_path(&schema(), now());
        assert!(archive.ends_with("archive/youtube_channel_stats_20240901.csv"));
        let archived = codec::read_log(&archive, &schema()).unwrap();
        assert_eq!(archived.snapshots.len(), 30);
        assert!(archived.snapshots.iter().all(|s| s.captured_at < cutoff));
    }

    #[test]
    fn test_cutoff_is_inclusive_for_kept_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), tmp.path().join("archive"));
        let cutoff = now() - TimeDelta::days(90);
        store
            .append(
                &schema(),
                &[
                    Snapshot::new("UC123", cutoff).with_metric("subs", 1.0),
                    Snapshot::new("UC123", cutoff - TimeDelta::seconds(1)).with_metric("subs", 2.0),
                ],
            )
            .unwrap();

        let summary = store.roll(&schema(), 90, now()).unwrap();
        assert_eq!(summary, RollSummary { kept: 1, archived: 1 });
    }

    #[test]
    fn test_same_day_rolls_accumulate_in_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), tmp.path().join("archive"));

        store.append(&schema(), &daily_rows(100)).unwrap();
        assert_eq!(store.roll(&schema(), 90, now()).unwrap().archived, 10);

        // new stale rows arrive (e.g. a backfill) and a second run happens
        store.append(&schema(), &daily_rows(95)[92..]).unwrap();
        assert_eq!(store.roll(&schema(), 90, now()).unwrap().archived, 3);

        let archived = codec::read_log(&store.archive_path(&schema(), now()), &schema()).unwrap();
        assert_eq!(archived.snapshots.len(), 13);
    }

    #[test]
    fn test_roll_noops() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), tmp.path().join("archive"));

        // no file at all
        assert_eq!(store.roll(&schema(), 90, now()).unwrap(), RollSummary::default());

        // header without a timestamp column is left untouched
        let path = store.log_path(&schema());
        std::fs::write(&path, "channel_id,subs\nUC123,5\n").unwrap();
        assert_eq!(store.roll(&schema(), 90, now()).unwrap(), RollSummary::default());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "channel_id,subs\nUC123,5\n"
        );
        assert!(!store.archive_dir().exists());
    }

    #[test]
    fn test_retention_beyond_calendar_archives_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path(), tmp.path().join("archive"));
        store.append(&schema(), &daily_rows(5)).unwrap();

        let summary = store.roll(&schema(), u32::MAX, now()).unwrap();
        assert_eq!(summary, RollSummary { kept: 5, archived: 0 });
        assert!(!store.archive_dir().exists());
    }

    #[test]
    fn test_failed_archive_write_leaves_log_intact() {
        let tmp = tempfile::tempdir().unwrap();
        // a regular file where the archive directory should be
        let blocker = tmp.path().join("archive");
        std::fs::write(&blocker, "not a directory").unwrap();
        let store = SnapshotStore::new(tmp.path(), &blocker);

        store.append(&schema(), &daily_rows(100)).unwrap();
        let path = store.log_path(&schema());
        let before = std::fs::read(&path).unwrap();

        let err = store.roll(&schema(), 90, now()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Io { .. } | StoreError::Persist { .. }
        ));

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "not a directory");

        let mut entries: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["archive", "youtube_channel_stats.csv"]);
    }
}
