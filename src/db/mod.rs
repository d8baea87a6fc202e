use log::info;

use crate::config::Settings;

mod archive;
mod cache;
mod codec;
mod error;
mod ledger;
pub mod models;
mod store;

pub use archive::RollSummary;
pub use cache::LogCache;
pub use error::StoreError;
pub use ledger::RunLedger;
pub use store::{SnapshotStore, UpsertSummary};

/// Everything persisted: the CSV snapshot logs, a TTL cache over them for
/// readers, and the run ledger.
///
/// Writers go through `store`; readers go through `cache`.
#[derive(Clone)]
pub struct Storage {
    pub store: SnapshotStore,
    pub cache: LogCache,
    pub ledger: RunLedger,
}

impl Storage {
    pub fn new(settings: &Settings) -> Self {
        let store = SnapshotStore::from_settings(&settings.storage);
        let cache = LogCache::new(store.clone(), &settings.cache);
        let ledger = RunLedger::new(settings.storage.ledger_path());

        info!(
            "Snapshot store at {} (archive {}, ledger {})",
            settings.storage.data_dir.display(),
            store.archive_dir().display(),
            ledger.path().display()
        );

        Self {
            store,
            cache,
            ledger,
        }
    }
}
