//! Error types for the data store.

use thiserror::Error;
use tidemark_model::ModelError;
use tidemark_net::NetError;
use tidemark_persist::PersistError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the data store.
///
/// Network-originated kinds nest under [`StoreError::Net`]; the predicate
/// helpers flatten the nesting so callers can match on the closed kind
/// set without caring which layer produced an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Client-side invariant violation: bad arguments or bad state.
    #[error("{0}")]
    Invalid(String),

    /// Sync bookkeeping violation: a push already in progress, an invalid
    /// pending-operation merge, or a missing `_id` while recording an
    /// intent.
    #[error("sync error: {0}")]
    Sync(String),

    /// Entity not found in the offline cache.
    #[error("entity {id} not found in collection {collection}")]
    NotFound {
        /// The collection searched.
        collection: String,
        /// The id that was not found.
        id: String,
    },

    /// Persister failure.
    #[error(transparent)]
    Persist(#[from] PersistError),

    /// Query/entity model failure.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Request-layer failure.
    #[error(transparent)]
    Net(#[from] NetError),

    /// Corrupted cached state.
    #[error("malformed cached state: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a client-side invariant violation.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Creates a sync bookkeeping error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync(message.into())
    }

    /// Creates a not-found error.
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// True for not-found failures from either the cache or the network.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::Net(NetError::NotFound(_))
        )
    }

    /// True for sync bookkeeping failures.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, StoreError::Sync(_))
    }

    /// True when the server rejected the credentials.
    #[must_use]
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, StoreError::Net(NetError::InvalidCredentials))
    }

    /// True when a delta-set request must fall back to a full pull:
    /// the `since` token was rejected or delta sync is not configured.
    #[must_use]
    pub fn requires_delta_fallback(&self) -> bool {
        matches!(
            self,
            StoreError::Net(NetError::InvalidCachedQuery(_))
                | StoreError::Net(NetError::MissingConfiguration(_))
        )
    }

    /// True for transient transport failures.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Net(net) if net.is_transient())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_covers_both_layers() {
        assert!(StoreError::not_found("books", "x").is_not_found());
        assert!(StoreError::Net(NetError::NotFound("gone".into())).is_not_found());
        assert!(!StoreError::invalid("nope").is_not_found());
    }

    #[test]
    fn delta_fallback_kinds() {
        assert!(StoreError::Net(NetError::InvalidCachedQuery("stale".into()))
            .requires_delta_fallback());
        assert!(StoreError::Net(NetError::MissingConfiguration("off".into()))
            .requires_delta_fallback());
        assert!(!StoreError::Net(NetError::Timeout).requires_delta_fallback());
    }

    #[test]
    fn transient_passthrough() {
        assert!(StoreError::Net(NetError::Timeout).is_transient());
        assert!(!StoreError::sync("busy").is_transient());
    }
}
