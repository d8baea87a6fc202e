use std::path::{Path, PathBuf};

use log::{info, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use super::codec::{self, LoadedLog};
use super::models::{LogSchema, Snapshot, SnapshotLog};
use super::StoreError;
use crate::config::StorageSettings;

/// CSV-backed snapshot logs, one file per domain.
///
/// `append`, `upsert` and `roll` (see `archive.rs`) are the only mutators.
/// Assumes a single writer per domain at a time; readers may run
/// concurrently because every write is an atomic file replace.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
    archive_dir: PathBuf,
}

/// Row counts of one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Readable rows in the log before the upsert.
    pub existing: usize,
    pub incoming: usize,
    /// Rows in the log after dedup.
    pub written: usize,
    /// Rows collapsed by the `(entity, minute)` rule.
    pub replaced: usize,
}

impl UpsertSummary {
    /// Net rows the log gained. Zero when every incoming row was already
    /// there.
    pub fn added(&self) -> usize {
        self.written.saturating_sub(self.existing)
    }
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.data_dir.clone(), settings.archive_path())
    }

    pub fn log_path(&self, schema: &LogSchema) -> PathBuf {
        self.data_dir.join(&schema.file)
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Full active log with sticky attributes filled, rows in file order.
    ///
    /// A missing file is an empty log. Malformed rows are skipped and
    /// counted in [`SnapshotLog::skipped_rows`].
    pub fn read(&self, schema: &LogSchema) -> Result<SnapshotLog, StoreError> {
        let loaded = codec::read_log(&self.log_path(schema), schema)?;

        let mut snapshots = loaded.snapshots;
        fill_sticky_attributes(&mut snapshots);

        Ok(SnapshotLog {
            domain: schema.name.clone(),
            snapshots,
            skipped_rows: loaded.skipped_rows,
        })
    }

    /// Adds `snapshots` to the end of the log as-is: no sort, no dedup.
    pub fn append(&self, schema: &LogSchema, snapshots: &[Snapshot]) -> Result<usize, StoreError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let path = self.log_path(schema);
        let loaded = self.load_for_write(&path, schema)?;

        let mut rows = loaded.snapshots;
        rows.extend_from_slice(snapshots);
        codec::write_log(&path, schema, &rows, &loaded.attribute_columns)?;

        Ok(snapshots.len())
    }

    /// Merges `snapshots` into the log keeping one row per
    /// `(entity, minute)`: the latest `captured_at`, and among exact ties the
    /// one written last. The rewritten log is sorted by `captured_at`.
    pub fn upsert(
        &self,
        schema: &LogSchema,
        snapshots: &[Snapshot],
    ) -> Result<UpsertSummary, StoreError> {
        let path = self.log_path(schema);
        let loaded = self.load_for_write(&path, schema)?;
        let existing = loaded.snapshots.len();

        let mut rows = loaded.snapshots;
        rows.extend_from_slice(snapshots);
        let total = rows.len();
        let rows = dedup_keep_last(rows);

        codec::write_log(&path, schema, &rows, &loaded.attribute_columns)?;

        let summary = UpsertSummary {
            existing,
            incoming: snapshots.len(),
            written: rows.len(),
            replaced: total - rows.len(),
        };
        info!(
            "[{}] upserted {} snapshots ({} rows, {} replaced)",
            schema.name, summary.incoming, summary.written, summary.replaced
        );
        Ok(summary)
    }

    /// Rewrites the log with every timestamp in canonical UTC form.
    /// Returns the number of rows written; malformed rows are dropped.
    pub fn normalize_timestamps(&self, schema: &LogSchema) -> Result<usize, StoreError> {
        let path = self.log_path(schema);
        if !path.exists() {
            return Ok(0);
        }
        let loaded = self.load_for_write(&path, schema)?;
        codec::write_log(&path, schema, &loaded.snapshots, &loaded.attribute_columns)?;

        info!(
            "[{}] normalized timestamps of {} rows",
            schema.name,
            loaded.snapshots.len()
        );
        Ok(loaded.snapshots.len())
    }

    /// `<data_dir>/<log stem>_backfilled.csv`.
    pub fn backfill_path(&self, schema: &LogSchema) -> PathBuf {
        self.data_dir
            .join(format!("{}_backfilled.csv", schema.stem()))
    }

    /// Replaces the backfill file beside the log with `snapshots`, in the
    /// log's CSV layout. The active log is not touched.
    pub fn write_backfill(
        &self,
        schema: &LogSchema,
        snapshots: &[Snapshot],
    ) -> Result<PathBuf, StoreError> {
        let path = self.backfill_path(schema);
        codec::write_log(&path, schema, snapshots, &[])?;
        Ok(path)
    }

    /// Loads the raw rows a rewrite starts from. Refuses files whose header
    /// lacks a required column, since rewriting them would drop every row.
    fn load_for_write(&self, path: &Path, schema: &LogSchema) -> Result<LoadedLog, StoreError> {
        let loaded = codec::read_log(path, schema)?;

        if !loaded.has_required_columns {
            return Err(StoreError::MissingColumn {
                path: path.to_path_buf(),
                column: format!("{} / {}", schema.entity_column, schema.timestamp_column),
            });
        }
        if loaded.skipped_rows > 0 {
            warn!(
                "[{}] {} malformed rows will be dropped from {}",
                schema.name,
                loaded.skipped_rows,
                path.display()
            );
        }

        Ok(loaded)
    }
}

/// Stable-sorts by `captured_at` and keeps the last row of each
/// `(entity, minute)` key.
pub(crate) fn dedup_keep_last(mut rows: Vec<Snapshot>) -> Vec<Snapshot> {
    rows.sort_by_key(|s| s.captured_at);

    let mut seen = FxHashSet::default();
    let mut keep = vec![false; rows.len()];
    for (idx, row) in rows.iter().enumerate().rev() {
        let (entity, minute) = row.dedup_key();
        keep[idx] = seen.insert((entity.to_string(), minute));
    }

    rows.into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect()
}

/// Carries each entity's last known non-empty attribute values forward onto
/// later snapshots that lack them. Row order is unchanged.
pub(crate) fn fill_sticky_attributes(rows: &mut [Snapshot]) {
    let mut order: Vec<usize> = (0..rows.len()).collect();
    order.sort_by(|&a, &b| {
        rows[a]
            .entity_key
            .cmp(&rows[b].entity_key)
            .then(rows[a].captured_at.cmp(&rows[b].captured_at))
    });

    let mut known: FxHashMap<String, String> = FxHashMap::default();
    let mut current: Option<String> = None;

    for idx in order {
        let row = &mut rows[idx];
        if current.as_deref() != Some(row.entity_key.as_str()) {
            known.clear();
            current = Some(row.entity_key.clone());
        }

        for (name, value) in &known {
            if row.attribute(name).is_none() {
                row.attributes.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in &row.attributes {
            if !value.is_empty() {
                known.insert(name.clone(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn schema() -> LogSchema {
        LogSchema::new(
            "spotify_artists",
            "spotify_stats.csv",
            "artist_id",
            "timestamp",
            &["followers", "popularity"],
        )
    }

    fn store(dir: &Path) -> SnapshotStore {
        SnapshotStore::new(dir, dir.join("archive"))
    }

    fn snap(entity: &str, ts: DateTime<Utc>, followers: f64) -> Snapshot {
        Snapshot::new(entity, ts).with_metric("followers", followers)
    }

    #[test]
    fn test_read_missing_log_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let log = store(tmp.path()).read(&schema()).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.domain, "spotify_artists");
        assert_eq!(log.skipped_rows, 0);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let row = snap("A", at(10, 0, 30), 100.0);

        store.upsert(&schema(), &[row.clone()]).unwrap();
        let once = std::fs::read_to_string(store.log_path(&schema())).unwrap();

        let summary = store.upsert(&schema(), &[row]).unwrap();
        let twice = std::fs::read_to_string(store.log_path(&schema())).unwrap();

        assert_eq!(once, twice);
        assert_eq!(summary.written, 1);
        assert_eq!(summary.replaced, 1);
        assert_eq!(summary.added(), 0);
    }

    #[test]
    fn test_dedup_keeps_later_second_in_same_minute() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        // later write first, earlier second: captured_at decides, not order
        store
            .upsert(&schema(), &[snap("A", at(10, 0, 45), 200.0)])
            .unwrap();
        store
            .upsert(&schema(), &[snap("A", at(10, 0, 5), 100.0)])
            .unwrap();

        let log = store.read(&schema()).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshots[0].captured_at, at(10, 0, 45));
        assert_eq!(log.snapshots[0].metric("followers"), Some(200.0));
    }

    #[test]
    fn test_dedup_exact_tie_keeps_last_write() {
        let rows = vec![snap("A", at(10, 0, 5), 1.0), snap("A", at(10, 0, 5), 2.0)];
        let kept = dedup_keep_last(rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].metric("followers"), Some(2.0));
    }

    #[test]
    fn test_upsert_sorts_out_of_order_input() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store
            .upsert(
                &schema(),
                &[
                    snap("B", at(12, 0, 0), 3.0),
                    snap("A", at(10, 0, 0), 1.0),
                    snap("A", at(11, 0, 0), 2.0),
                    snap("B", at(10, 0, 0), 9.0),
                ],
            )
            .unwrap();

        let log = store.read(&schema()).unwrap();
        let times: Vec<_> = log.snapshots.iter().map(|s| s.captured_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
        assert_eq!(log.len(), 4);
        assert_eq!(log.entities(), vec!["A", "B"]);
    }

    #[test]
    fn test_append_does_not_dedup() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let row = snap("A", at(10, 0, 0), 100.0);

        assert_eq!(store.append(&schema(), &[row.clone()]).unwrap(), 1);
        assert_eq!(store.append(&schema(), &[row]).unwrap(), 1);
        assert_eq!(store.read(&schema()).unwrap().len(), 2);
    }

    #[test]
    fn test_read_fills_sticky_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());

        store
            .append(
                &schema(),
                &[
                    snap("A", at(12, 0, 0), 3.0),
                    snap("A", at(10, 0, 0), 1.0)
                        .with_attribute("genres", "pop")
                        .with_attribute("image_url", "https://img/a1"),
                    snap("B", at(11, 0, 0), 7.0),
                    snap("A", at(11, 0, 0), 2.0).with_attribute("image_url", "https://img/a2"),
                ],
            )
            .unwrap();

        let log = store.read(&schema()).unwrap();
        // file order is kept; fill follows time order per entity
        let latest_a = &log.snapshots[0];
        assert_eq!(latest_a.captured_at, at(12, 0, 0));
        assert_eq!(latest_a.attribute("genres"), Some("pop"));
        assert_eq!(latest_a.attribute("image_url"), Some("https://img/a2"));
        // nothing leaks across entities
        assert_eq!(log.snapshots[2].attribute("genres"), None);

        // the persisted file is not rewritten by the fill
        let text = std::fs::read_to_string(store.log_path(&schema())).unwrap();
        let first_row = text.lines().nth(1).unwrap();
        assert!(first_row.contains("\"\",\"\""));
    }

    #[test]
    fn test_malformed_row_is_skipped_and_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        std::fs::write(
            store.log_path(&schema()),
            "\"artist_id\",\"followers\",\"popularity\",\"genres\",\"timestamp\"\n\
             \"A\",\"100\",\"50\",\"pop\",\"2024-05-01T10:00:00Z\"\n\
             \"A\",\"101\",\"50\",\"2024-05-01T11:00:00Z\"\n\
             \"B\",\"7\",\"40\",\"rock\",\"2024-05-01T11:00:00Z\"\n",
        )
        .unwrap();

        let log = store.read(&schema()).unwrap();
        assert_eq!(log.skipped_rows, 1);
        assert_eq!(log.len(), 2);
        assert_eq!(log.snapshots[1].entity_key, "B");
        assert_eq!(log.snapshots[1].metric("followers"), Some(7.0));
    }

    #[test]
    fn test_write_refuses_log_without_timestamp_column() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let path = store.log_path(&schema());
        std::fs::write(&path, "artist_id,followers\nA,100\n").unwrap();

        let err = store
            .upsert(&schema(), &[snap("A", at(10, 0, 0), 1.0)])
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "artist_id,followers\nA,100\n"
        );
    }

    #[test]
    fn test_normalize_timestamps_rewrites_canonical() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path());
        let path = store.log_path(&schema());
        std::fs::write(
            &path,
            "artist_id,followers,popularity,timestamp\n\
             A,100,50,2024-05-01 12:00:00+02:00\n\
             A,101,50,2024-05-01 11:30:00\n",
        )
        .unwrap();

        assert_eq!(store.normalize_timestamps(&schema()).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"2024-05-01T10:00:00Z\""));
        assert!(text.contains("\"2024-05-01T11:30:00Z\""));
        assert_eq!(
            store.normalize_timestamps(&LogSchema {
                file: "absent.csv".into(),
                ..schema()
            })
            .unwrap(),
            0
        );
    }
}
