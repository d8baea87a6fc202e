mod snapshot_log;
mod run_record;
mod snapshot;

pub use snapshot_log::{LogSchema, SnapshotLog};
pub use run_record::{DomainRunStats, RunRecord, RunStatus};
pub use snapshot::Snapshot;
