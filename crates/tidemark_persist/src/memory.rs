//! In-memory persister for testing.

use crate::error::PersistResult;
use crate::persister::KeyValuePersister;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory key/value persister.
///
/// This persister keeps all state in a process-local map and is suitable
/// for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that do not need to survive the process
///
/// # Thread Safety
///
/// The persister is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use tidemark_persist::{KeyValuePersister, MemoryPersister};
///
/// let persister = MemoryPersister::new();
/// persister.write("app.books", b"[]").unwrap();
/// assert_eq!(persister.read("app.books").unwrap(), Some(b"[]".to_vec()));
/// ```
#[derive(Debug, Default)]
pub struct MemoryPersister {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryPersister {
    /// Creates a new empty in-memory persister.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValuePersister for MemoryPersister {
    fn read(&self, key: &str) -> PersistResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &[u8]) -> PersistResult<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> PersistResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
