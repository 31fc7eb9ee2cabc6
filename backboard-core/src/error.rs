//! Error types for backboard-core

use thiserror::Error;

/// Main error type for the backboard-core library.
///
/// No error here is fatal to a host process: ingest errors are scoped to a
/// single event, aggregation errors to a single call. `Store` failures are
/// retryable by the caller; the core performs no internal retry.
#[derive(Error, Debug)]
pub enum Error {
    /// Event failed schema or range validation; the event is dropped
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// Event references a lecture with no known concept list
    #[error("unknown lecture: {0}")]
    UnknownLecture(String),

    /// Referential integrity miss on a student id
    #[error("unknown student: {0}")]
    UnknownStudent(String),

    /// Store I/O failure, retryable by the caller
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Aggregation was cancelled cooperatively; the accumulator is discarded
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for validation failures at the ingest boundary.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedEvent {
            reason: reason.into(),
        }
    }
}

/// Result type alias for backboard-core
pub type Result<T> = std::result::Result<T, Error>;
