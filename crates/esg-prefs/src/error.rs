//! Error types for the preference store.

use thiserror::Error;

/// Result type alias for preference store operations.
pub type PrefResult<T> = Result<T, PrefError>;

/// Errors that can occur during preference store operations.
#[derive(Debug, Error)]
pub enum PrefError {
    /// Missing or mismatched input. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// `overwrite: false` and a different value is already stored.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("backing store error: {0}")]
    Upstream(#[from] esg_airtable::AirtableError),
}

impl PrefError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        PrefError::Validation(msg.into())
    }
}
