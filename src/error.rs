//! Error types for the reconciliation engine.

use crate::types::{RowId, Table};
use thiserror::Error;

/// Main error type for engine operations.
///
/// A rate limit denial is deliberately absent: it is a decision value
/// ([`crate::limiter::RateDecision`]), not a failure.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A change-feed channel failed to open or was dropped.
    /// Reconnection is the transport's concern; the engine does not retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store rejected a write (constraint violation, immutable field, ...).
    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("row not found: {table}/{id}")]
    RowNotFound { table: Table, id: RowId },

    /// A row failed schema validation at the store boundary.
    #[error("invalid row in {table}: {reason}")]
    InvalidRow { table: Table, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
