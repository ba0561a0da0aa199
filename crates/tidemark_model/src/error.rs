//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or evaluating queries and entities.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A value that should be a JSON object was something else.
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// A `$regex` pattern failed to compile.
    #[error("invalid regex pattern {pattern:?}")]
    InvalidRegex {
        /// The offending pattern.
        pattern: String,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },

    /// A serialized query could not be interpreted.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    /// Creates an invalid-entity error.
    pub fn invalid_entity(message: impl Into<String>) -> Self {
        Self::InvalidEntity(message.into())
    }

    /// Creates an invalid-query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}
