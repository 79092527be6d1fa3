//! Error types for backing-store access.

use thiserror::Error;

/// Result type alias for backing-store operations.
pub type AirtableResult<T> = Result<T, AirtableError>;

/// Errors returned by [`RecordStore`](crate::RecordStore) and
/// [`SchemaSource`](crate::SchemaSource) implementations.
#[derive(Debug, Error)]
pub enum AirtableError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl AirtableError {
    /// Denied by the store (401/403).
    pub fn is_auth(&self) -> bool {
        matches!(self, AirtableError::Unauthorized(_))
    }
}
