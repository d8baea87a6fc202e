pub mod alerts;
pub mod backfill;
pub mod ingest;
