use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{info, warn};
use rustc_hash::FxHashMap;
use tokio::io::AsyncWriteExt;

use super::{RawRecord, SnapshotSource};

/// JSON-lines drop file of [`RawRecord`]s, one per line.
///
/// Filled by hand or by an external scraper. An ingestion pass takes the
/// file with [`InboxSource::claim`], which moves it out of the way before
/// parsing it once: every dropped record is ingested exactly once, and lines
/// written during the pass go into a fresh inbox for the next one. A missing
/// file means nothing was dropped yet; unparsable lines are logged and
/// skipped.
pub struct InboxSource {
    name: String,
    path: PathBuf,
    claimed: Option<PathBuf>,
    entities: Vec<String>,
    records: FxHashMap<String, Vec<RawRecord>>,
}

impl InboxSource {
    /// Parses `path` in place without moving it.
    pub async fn open(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self> {
        let mut source = Self::empty(name.into(), path.into());
        let path = source.path.clone();
        source.load(&path).await?;
        Ok(source)
    }

    /// Moves the inbox to `<processed_dir>/<stem>_<YYYYmmddTHHMMSS>.jsonl`
    /// and parses it from there. If parsing fails the file is put back.
    pub async fn claim(
        name: impl Into<String>,
        inbox: impl Into<PathBuf>,
        processed_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let mut source = Self::empty(name.into(), inbox.into());

        match tokio::fs::symlink_metadata(&source.path).await {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(source),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to stat inbox {:?}", source.path))
            },
        }

        tokio::fs::create_dir_all(processed_dir)
            .await
            .with_context(|| format!("failed to create {:?}", processed_dir))?;
        let target = claim_target(&source.path, processed_dir, now).await?;
        tokio::fs::rename(&source.path, &target)
            .await
            .with_context(|| format!("failed to move inbox {:?} to {:?}", source.path, target))?;
        source.claimed = Some(target.clone());

        if let Err(e) = source.load(&target).await {
            if let Err(restore) = source.release().await {
                warn!("[{}] could not put inbox back: {:#}", source.name, restore);
            }
            return Err(e);
        }

        info!(
            "[{}] claimed {} inbox records from {:?}",
            source.name,
            source.len(),
            source.path
        );
        Ok(source)
    }

    /// Returns a claimed file to the inbox so the next pass sees its records
    /// again. Lines dropped since the claim are kept after them.
    pub async fn release(&self) -> Result<()> {
        let Some(claimed) = self.claimed.as_ref() else {
            return Ok(());
        };

        if !tokio::fs::try_exists(&self.path).await.unwrap_or(true) {
            tokio::fs::rename(claimed, &self.path)
                .await
                .with_context(|| format!("failed to restore inbox {:?}", self.path))?;
        } else {
            let contents = tokio::fs::read(claimed)
                .await
                .with_context(|| format!("failed to read {:?}", claimed))?;
            let mut inbox = tokio::fs::OpenOptions::new()
                .append(true)
                .open(&self.path)
                .await
                .with_context(|| format!("failed to open inbox {:?}", self.path))?;
            inbox.write_all(b"\n").await?;
            inbox.write_all(&contents).await?;
            inbox.write_all(b"\n").await?;
            inbox.sync_all().await?;
            tokio::fs::remove_file(claimed)
                .await
                .with_context(|| format!("failed to remove {:?}", claimed))?;
        }

        warn!("[{}] returned {} records to {:?}", self.name, self.len(), self.path);
        Ok(())
    }

    /// Inbox location this source was created for.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the records were moved to, when [`InboxSource::claim`] found a file.
    pub fn claimed_path(&self) -> Option<&Path> {
        self.claimed.as_deref()
    }

    /// Parsed records across all entities.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn empty(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            claimed: None,
            entities: Vec::new(),
            records: FxHashMap::default(),
        }
    }

    async fn load(&mut self, path: &Path) -> Result<()> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("failed to read inbox {:?}", path)),
        };

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = match serde_json::from_str::<RawRecord>(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        "[{}] skipping inbox line {} of {:?}: {}",
                        self.name,
                        idx + 1,
                        path,
                        e
                    );
                    continue;
                },
            };

            let key = record.entity_key.trim();
            if key.is_empty() {
                warn!(
                    "[{}] skipping inbox line {} of {:?}: empty entity key",
                    self.name,
                    idx + 1,
                    path
                );
                continue;
            }
            if !self.records.contains_key(key) {
                self.entities.push(key.to_string());
            }
            self.records.entry(key.to_string()).or_default().push(record);
        }
        Ok(())
    }
}

async fn claim_target(inbox: &Path, processed_dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let stem = inbox
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "inbox".to_string());
    let base = format!("{}_{}", stem, now.format("%Y%m%dT%H%M%S"));

    let mut target = processed_dir.join(format!("{}.jsonl", base));
    let mut n = 1;
    while tokio::fs::try_exists(&target).await? {
        target = processed_dir.join(format!("{}_{}.jsonl", base, n));
        n += 1;
    }
    Ok(target)
}

impl SnapshotSource for InboxSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn entities(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(self.entities.clone()) })
    }

    fn fetch<'a>(&'a self, entity: &'a str) -> BoxFuture<'a, Result<Vec<RawRecord>>> {
        Box::pin(async move { Ok(self.records.get(entity).cloned().unwrap_or_default()) })
    }
}
