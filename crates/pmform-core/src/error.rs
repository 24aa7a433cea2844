//! Error types for pmform-core

use thiserror::Error;

use crate::client::SubmitError;

/// Result type alias using pmform-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in pmform-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Submission to the form API failed
    #[error(transparent)]
    Submit(#[from] SubmitError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Client configuration error
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Failures raised at the local key-value store boundary.
///
/// Callers treat persistence as best-effort: these are reported and logged,
/// never allowed to take down the form.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store rejected the operation (quota, disabled, locked, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// SQLite error from the on-disk backend
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Value could not be encoded for storage
    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
