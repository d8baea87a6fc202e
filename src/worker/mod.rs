pub mod inbox;
pub mod ingestor;
pub mod source;

pub use inbox::InboxSource;
pub use ingestor::Ingestor;
pub use source::{RawRecord, RecordError, SnapshotSource};
