//! Error types for the request layer.

use serde_json::Value;
use thiserror::Error;
use tidemark_model::ModelError;
use tidemark_persist::PersistError;

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors surfaced by the request layer and network repository.
#[derive(Debug, Error)]
pub enum NetError {
    /// The server rejected the credentials and a refresh was not possible.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The refresh token itself was rejected.
    #[error("invalid grant: refresh token rejected")]
    InvalidGrant,

    /// Session auth was requested with no active user.
    #[error("no active user")]
    NoActiveUser,

    /// Entity, collection or endpoint not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Delta sync is not configured for the collection.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// The server rejected the delta-set `since` token; the caller must
    /// fall back to a full pull.
    #[error("invalid cached query: {0}")]
    InvalidCachedQuery(String),

    /// The server failed (5xx or an explicit retryable error).
    #[error("server error ({status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Server-provided message.
        message: String,
    },

    /// A named 4xx error that maps to no dedicated kind.
    #[error("{name}: {message}")]
    BadRequest {
        /// The server's error name.
        name: String,
        /// Human-readable description.
        message: String,
    },

    /// The request exceeded its configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The transport produced no response at all.
    #[error("no response: {0}")]
    NoResponse(String),

    /// Bad arguments to a request-layer API.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persister failure while touching the active-user slot.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Query/entity model failure.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A response body was not the expected JSON shape.
    #[error("malformed response body: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetError {
    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Returns true for transient transport failures.
    ///
    /// Cache-mode reads swallow transient failures in their network phase
    /// and let the cached value stand; everything else propagates.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, NetError::Timeout | NetError::NoResponse(_))
    }
}

/// Maps a non-2xx response to a typed error.
///
/// Named errors in the body win over the raw status code; unnamed 5xx
/// become [`NetError::ServerError`], unnamed 401 becomes
/// [`NetError::InvalidCredentials`], unnamed 404 becomes
/// [`NetError::NotFound`].
pub(crate) fn map_error_response(status: u16, body: &[u8]) -> NetError {
    let parsed: Option<Value> = serde_json::from_slice(body).ok();
    let name = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("description").or_else(|| v.get("debug")))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match name {
        "InvalidCredentials" => NetError::InvalidCredentials,
        "InvalidGrant" | "invalid_grant" => NetError::InvalidGrant,
        "KinveyInternalErrorRetry" => NetError::ServerError { status, message },
        "NotFound" | "EntityNotFound" | "CollectionNotFound" | "UserNotFound" => {
            NetError::NotFound(message)
        }
        "MissingConfiguration" => NetError::MissingConfiguration(message),
        // The backend reports a stale delta-set `since` as either of these.
        "FeatureUnavailable" | "ParameterValueOutOfRange" | "InvalidCachedQuery" => {
            NetError::InvalidCachedQuery(message)
        }
        _ if status == 401 => NetError::InvalidCredentials,
        _ if status == 404 => NetError::NotFound(message),
        _ if status >= 500 => NetError::ServerError { status, message },
        _ if !name.is_empty() => NetError::BadRequest {
            name: name.to_string(),
            message,
        },
        _ => NetError::ServerError { status, message },
    }
}
