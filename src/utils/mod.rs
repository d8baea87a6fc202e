//! Utility functions shared by the store, the analytics and the workers.
//!
//! - [`timestamp`] - Timestamp normalization to canonical UTC
//! - [`retry`] - Bounded retry with exponential backoff

mod retry;
mod timestamp;

// ============================================
// Re-exports
// ============================================

// Timestamp utilities
pub use timestamp::{
    hour_floor, minute_key, normalize, normalize_datetime, to_canonical, TimestampError,
    CANONICAL_FORMAT,
};

// Retry utilities
pub use retry::with_retry;
