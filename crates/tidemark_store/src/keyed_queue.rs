//! Per-key serialization of operations.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A per-key serializer: tasks for the same key run one at a time in
/// acquisition order, while independent keys proceed in parallel.
///
/// Used by the offline repository to serialize mutations per
/// `(appKey, collection)`. Reads bypass the queue. A failing or panicking
/// task does not block subsequent tasks for its key - the key's lock is
/// released on unwind.
#[derive(Default)]
pub struct KeyedQueue {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` after every previously enqueued task for `key` has
    /// finished.
    pub fn run<T>(&self, key: &str, task: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let _guard = lock.lock();
        task()
    }
}
