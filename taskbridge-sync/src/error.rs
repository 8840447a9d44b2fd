//! Error types for taskbridge-sync.

use thiserror::Error;

use taskbridge_core::error::StoreError;
use taskbridge_core::types::Side;

/// A raw inbound event or polled row that cannot be turned into a canonical
/// snapshot. Dropped and logged; never retried.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("unrecognized event type '{event_type}'")]
    UnknownEventType { event_type: String },

    #[error("unrecognized status value '{value}'")]
    UnknownStatus { value: String },

    #[error("timestamp out of range: {value}")]
    InvalidTimestamp { value: i64 },
}

/// All errors that can arise from a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An event that could not be normalized.
    #[error("malformed event: {0}")]
    Malformed(#[from] NormalizeError),

    /// An error from the link store.
    #[error("link store error: {0}")]
    Store(#[from] StoreError),

    /// A transient target failure that survived every retry attempt.
    #[error("transient write to {side} failed after {attempts} attempts: {message}")]
    TransientWrite {
        side: Side,
        attempts: u32,
        message: String,
    },

    /// The target permanently rejected the write (e.g. the record was deleted
    /// concurrently). The pair is skipped and re-evaluated next pass.
    #[error("write to {side} rejected: {message}")]
    TargetRejected { side: Side, message: String },
}
