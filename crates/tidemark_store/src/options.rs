//! Store modes, options and sync tuning.

use crate::error::{StoreError, StoreResult};
use std::time::Duration;

/// The three store modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Every operation goes to the backend; no local state is touched.
    Network,
    /// Every operation is local; mutations queue for a later push.
    Sync,
    /// Reads serve the cache first and reconcile with the backend;
    /// writes are local-first with an opportunistic push.
    Cache,
}

impl StoreMode {
    /// Returns true for modes that keep local state.
    #[must_use]
    pub fn uses_cache(self) -> bool {
        matches!(self, StoreMode::Sync | StoreMode::Cache)
    }
}

/// A collection handle: the backend name plus an optional local tag.
///
/// The tag partitions the collection's *local* state - offline entities,
/// sync items and cached queries - while network traffic always targets
/// the untagged backend collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    /// Backend collection name.
    pub name: String,
    /// Optional local partition tag.
    pub tag: Option<String>,
}

impl CollectionRef {
    /// Creates an untagged reference.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
        }
    }

    /// Creates a tagged reference.
    pub fn tagged(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: Some(tag.into()),
        }
    }

    /// Returns the local collection name: `name` or `name.tag`.
    #[must_use]
    pub fn local_name(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}.{tag}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Validates a tag: non-empty, alphanumeric plus `-` and `_`.
pub fn validate_tag(tag: &str) -> StoreResult<()> {
    let valid = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::invalid(format!(
            "tag {tag:?} must contain only alphanumerics, dashes and underscores"
        )))
    }
}

/// Per-store options supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Local partition tag.
    pub tag: Option<String>,
    /// TTL (seconds) forwarded as `kinveyfile_ttl` on reads.
    pub ttl: Option<u64>,
    /// TLS preference forwarded as `kinveyfile_tls` on reads.
    pub file_tls: Option<bool>,
    /// Use delta-set pulls when a cached query is available.
    pub use_delta_set: bool,
    /// Paginate unbounded pulls through a count + page fan-out.
    pub auto_pagination: bool,
    /// Page size for auto-pagination; falls back to the client default.
    pub page_size: Option<u64>,
    /// Per-store request timeout override.
    pub timeout: Option<Duration>,
}

impl StoreOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local partition tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Sets the file-link TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enables delta-set pulls.
    #[must_use]
    pub fn with_delta_set(mut self) -> Self {
        self.use_delta_set = true;
        self
    }

    /// Enables auto-pagination, optionally with a page size.
    #[must_use]
    pub fn with_auto_pagination(mut self, page_size: Option<u64>) -> Self {
        self.auto_pagination = true;
        self.page_size = page_size;
        self
    }

    /// Sets the per-store request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Renders the pull options these store options imply.
    #[must_use]
    pub fn pull_options(&self) -> PullOptions {
        PullOptions {
            use_delta_set: self.use_delta_set,
            auto_pagination: self.auto_pagination,
            page_size: self.page_size,
        }
    }
}

/// Options for one pull.
#[derive(Debug, Clone, Copy, Default)]
pub struct PullOptions {
    /// Use delta-set when a cached query is available.
    pub use_delta_set: bool,
    /// Paginate through a count + page fan-out.
    pub auto_pagination: bool,
    /// Page size for auto-pagination.
    pub page_size: Option<u64>,
}

/// What a pull does when pending sync items match its query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingSyncPolicy {
    /// Silently push the matching items first (legacy-compatible).
    #[default]
    PushFirst,
    /// Fail the pull with a sync error.
    Fail,
}

/// Concurrency limits and sync defaults, configured per client.
#[derive(Debug, Clone)]
pub struct SyncLimits {
    /// Maximum concurrent push requests per batch.
    pub max_concurrent_push: usize,
    /// Maximum concurrent page requests per paginated pull.
    pub max_concurrent_pull: usize,
    /// Default page size for auto-pagination.
    pub default_page_size: u64,
    /// Pending-sync policy for pulls.
    pub pending_policy: PendingSyncPolicy,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            max_concurrent_push: 10,
            max_concurrent_pull: 4,
            default_page_size: 10_000,
            pending_policy: PendingSyncPolicy::PushFirst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_name_includes_tag() {
        assert_eq!(CollectionRef::new("books").local_name(), "books");
        assert_eq!(
            CollectionRef::tagged("books", "draft").local_name(),
            "books.draft"
        );
    }

    #[test]
    fn tag_validation() {
        assert!(validate_tag("draft-2_x").is_ok());
        assert!(validate_tag("").is_err());
        assert!(validate_tag("has space").is_err());
        assert!(validate_tag("dot.dot").is_err());
    }

    #[test]
    fn store_options_imply_pull_options() {
        let options = StoreOptions::new().with_delta_set();
        let pull = options.pull_options();
        assert!(pull.use_delta_set);
        assert!(!pull.auto_pagination);

        let options = StoreOptions::new().with_auto_pagination(Some(2));
        let pull = options.pull_options();
        assert!(pull.auto_pagination);
        assert_eq!(pull.page_size, Some(2));
    }

    #[test]
    fn mode_cache_usage() {
        assert!(StoreMode::Sync.uses_cache());
        assert!(StoreMode::Cache.uses_cache());
        assert!(!StoreMode::Network.uses_cache());
    }
}
