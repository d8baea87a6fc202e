use std::path::PathBuf;

use thiserror::Error;

/// Failures of the snapshot store.
///
/// Malformed rows are not errors: they are skipped and counted on the
/// returned log. Every variant here aborts the operation before the target
/// file is replaced, so the previous contents stay intact.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to replace {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
    #[error("{} has no {column:?} column; refusing to rewrite it", .path.display())]
    MissingColumn { path: PathBuf, column: String },
    #[error("failed to encode ledger record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
