//! Error types for persister operations.

use std::io;
use thiserror::Error;

/// Result type for persister operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors that can occur in a key/value persister.
#[derive(Debug, Error)]
pub enum PersistError {
    /// An I/O error occurred in the backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stored blob could not be interpreted.
    #[error("corrupted value under key {key}: {message}")]
    Corrupted {
        /// The key whose value is damaged.
        key: String,
        /// Description of the damage.
        message: String,
    },

    /// Backend-specific failure (SQLite, WebSQL, etc.).
    #[error("persister backend error: {0}")]
    Backend(String),
}

impl PersistError {
    /// Creates a corrupted-value error.
    pub fn corrupted(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
