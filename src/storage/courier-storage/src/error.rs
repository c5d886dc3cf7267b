//! Storage error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reading key material.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Store could not be reached or opened.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The store did not answer in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Query failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored data could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store does not implement this query.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
