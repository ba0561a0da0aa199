//! Persister trait definition.

use crate::error::PersistResult;

/// A string-keyed blob store backing Tidemark's local state.
///
/// Persisters are **opaque byte stores**. Tidemark owns all interpretation
/// of the stored blobs (entity arrays, sync items, cached queries) - a
/// persister never inspects what it holds.
///
/// # Invariants
///
/// - `read` returns exactly the bytes most recently written under the key
/// - `write` replaces any previous value atomically with respect to `read`
/// - `keys` reflects all keys with a stored value at the time of the call
/// - Implementations must be `Send + Sync`; Tidemark serializes conflicting
///   writers above this layer, but readers run concurrently
///
/// # Implementors
///
/// - [`crate::MemoryPersister`] - for tests and ephemeral caches
/// - Platform backends (SQLite, IndexedDB, ...) live outside this workspace
pub trait KeyValuePersister: Send + Sync {
    /// Reads the value stored under `key`, if any.
    fn read(&self, key: &str) -> PersistResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: &[u8]) -> PersistResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Returns `true` if a value was present.
    fn remove(&self, key: &str) -> PersistResult<bool>;

    /// Returns every key that currently has a stored value.
    ///
    /// Used for prefix-scoped cache clears; order is unspecified.
    fn keys(&self) -> PersistResult<Vec<String>>;
}
