//! CSV layout of snapshot logs.
//!
//! Header row, then one quoted row per snapshot:
//! `entity, metrics..., attributes..., timestamp`. An empty field means the
//! value is absent. Rows that do not fit the header are skipped and counted,
//! never fatal. Writes go through a temporary file in the target directory
//! that is renamed over the target, so readers see either the old or the new
//! file, never a truncated one.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;

use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use log::warn;
use rustc_hash::FxHashSet;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::models::{LogSchema, Snapshot};
use super::StoreError;
use crate::utils::{normalize, to_canonical, TimestampError};

/// Rows of one log file as stored, before any read-path fill.
#[derive(Debug, Default)]
pub(crate) struct LoadedLog {
    pub snapshots: Vec<Snapshot>,
    pub skipped_rows: usize,
    /// Attribute columns in header order, so rewrites keep the file layout.
    pub attribute_columns: Vec<String>,
    /// False when an existing header lacks the entity or timestamp column.
    pub has_required_columns: bool,
}

impl LoadedLog {
    fn empty() -> Self {
        Self {
            has_required_columns: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
enum RowError {
    #[error("empty entity key")]
    MissingEntity,
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
    #[error("non-numeric {column:?} value {value:?}")]
    Metric { column: String, value: String },
}

struct ColumnLayout {
    entity: usize,
    timestamp: usize,
    metrics: Vec<(usize, String)>,
    attributes: Vec<(usize, String)>,
}

impl ColumnLayout {
    fn resolve(headers: &[String], schema: &LogSchema) -> Option<Self> {
        let entity = headers.iter().position(|h| *h == schema.entity_column)?;
        let timestamp = headers.iter().position(|h| *h == schema.timestamp_column)?;

        let mut metrics = Vec::new();
        let mut attributes = Vec::new();
        for (idx, name) in headers.iter().enumerate() {
            if idx == entity || idx == timestamp || name.is_empty() {
                continue;
            }
            if schema.is_metric(name) {
                metrics.push((idx, name.clone()));
            } else {
                attributes.push((idx, name.clone()));
            }
        }

        Some(Self {
            entity,
            timestamp,
            metrics,
            attributes,
        })
    }

    fn parse(&self, record: &StringRecord) -> Result<Snapshot, RowError> {
        let entity = record.get(self.entity).unwrap_or_default().trim();
        if entity.is_empty() {
            return Err(RowError::MissingEntity);
        }
        let captured_at = normalize(record.get(self.timestamp).unwrap_or_default())?;

        let mut snapshot = Snapshot::new(entity, captured_at);
        for (idx, column) in &self.metrics {
            let raw = record.get(*idx).unwrap_or_default().trim();
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    snapshot.metrics.insert(column.clone(), value);
                },
                // pandas writes missing numbers as "nan"
                Ok(_) => {},
                Err(_) => {
                    return Err(RowError::Metric {
                        column: column.clone(),
                        value: raw.to_string(),
                    })
                },
            }
        }
        for (idx, column) in &self.attributes {
            let value = record.get(*idx).unwrap_or_default();
            if !value.is_empty() {
                snapshot
                    .attributes
                    .insert(column.clone(), value.to_string());
            }
        }

        Ok(snapshot)
    }
}

/// Reads every well-formed row of `path`. A missing or empty file is an
/// empty log.
pub(crate) fn read_log(path: &Path, schema: &LogSchema) -> Result<LoadedLog, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LoadedLog::empty()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let mut reader = ReaderBuilder::new().flexible(true).from_reader(file);
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| StoreError::csv(path, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Ok(LoadedLog::empty());
    }

    let layout = ColumnLayout::resolve(&headers, schema);
    let mut loaded = LoadedLog {
        attribute_columns: layout
            .as_ref()
            .map(|l| l.attributes.iter().map(|(_, name)| name.clone()).collect())
            .unwrap_or_default(),
        has_required_columns: layout.is_some(),
        ..Default::default()
    };

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("{}: skipping unreadable row: {}", path.display(), e);
                loaded.skipped_rows += 1;
                continue;
            },
        };
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let Some(layout) = layout.as_ref() else {
            loaded.skipped_rows += 1;
            continue;
        };

        if record.len() != headers.len() {
            warn!(
                "{}:{}: skipping row with {} fields instead of {}",
                path.display(),
                line,
                record.len(),
                headers.len()
            );
            loaded.skipped_rows += 1;
            continue;
        }

        match layout.parse(&record) {
            Ok(snapshot) => loaded.snapshots.push(snapshot),
            Err(e) => {
                warn!("{}:{}: skipping row: {}", path.display(), line, e);
                loaded.skipped_rows += 1;
            },
        }
    }

    if !loaded.has_required_columns {
        warn!(
            "{}: header lacks {:?} or {:?}; {} rows unreadable",
            path.display(),
            schema.entity_column,
            schema.timestamp_column,
            loaded.skipped_rows
        );
    }

    Ok(loaded)
}

/// Atomically replaces `path` with `snapshots`.
///
/// `known_attributes` keeps the existing column order; attributes first
/// seen in `snapshots` are appended after them.
pub(crate) fn write_log(
    path: &Path,
    schema: &LogSchema,
    snapshots: &[Snapshot],
    known_attributes: &[String],
) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let attributes = attribute_columns(schema, snapshots, known_attributes);
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;

    {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(tmp.as_file_mut());

        let mut header: Vec<&str> = Vec::with_capacity(schema.metrics.len() + attributes.len() + 2);
        header.push(&schema.entity_column);
        header.extend(schema.metrics.iter().map(String::as_str));
        header.extend(attributes.iter().map(String::as_str));
        header.push(&schema.timestamp_column);
        writer
            .write_record(&header)
            .map_err(|e| StoreError::csv(path, e))?;

        for snapshot in snapshots {
            let mut row: Vec<String> = Vec::with_capacity(header.len());
            row.push(snapshot.entity_key.clone());
            for metric in &schema.metrics {
                row.push(snapshot.metric(metric).map(format_metric).unwrap_or_default());
            }
            for attribute in &attributes {
                row.push(snapshot.attribute(attribute).unwrap_or_default().to_string());
            }
            row.push(to_canonical(&snapshot.captured_at));

            writer
                .write_record(&row)
                .map_err(|e| StoreError::csv(path, e))?;
        }

        writer.flush().map_err(|e| StoreError::io(path, e))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.to_path_buf(),
        source: e,
    })?;

    Ok(())
}

fn attribute_columns(
    schema: &LogSchema,
    snapshots: &[Snapshot],
    known_attributes: &[String],
) -> Vec<String> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    seen.insert(&schema.entity_column);
    seen.insert(&schema.timestamp_column);
    seen.extend(schema.metrics.iter().map(String::as_str));

    let mut columns = Vec::new();
    let candidates = known_attributes
        .iter()
        .chain(snapshots.iter().flat_map(|s| s.attributes.keys()));
    for name in candidates {
        if seen.insert(name.as_str()) {
            columns.push(name.clone());
        }
    }
    columns
}

fn format_metric(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}
