//! Two-phase read results.

use crate::error::{StoreError, StoreResult};

type Phase<T> = Box<dyn FnOnce() -> Option<StoreResult<T>> + Send>;

/// A lazy, finite sequence of one or two read results.
///
/// Network and Sync stores yield exactly one value. Cache stores yield
/// the cached value first and, when the network phase has something to
/// say, the network-reconciled value second - in that order, always.
/// A suppressed network phase (transient failure) simply ends the
/// stream after the first value.
///
/// The second phase runs lazily on the first `next()` call that reaches
/// it, so callers that only want the cached value never pay for the
/// network round trip.
pub struct ReadStream<T> {
    first: Option<StoreResult<T>>,
    second: Option<Phase<T>>,
}

impl<T> ReadStream<T> {
    /// A stream yielding exactly one value.
    #[must_use]
    pub fn single(result: StoreResult<T>) -> Self {
        Self {
            first: Some(result),
            second: None,
        }
    }

    /// A stream yielding a first value and then whatever the deferred
    /// phase produces (`None` suppresses the second value).
    #[must_use]
    pub fn two_phase(
        first: StoreResult<T>,
        second: impl FnOnce() -> Option<StoreResult<T>> + Send + 'static,
    ) -> Self {
        Self {
            first: Some(first),
            second: Some(Box::new(second)),
        }
    }

    /// A stream whose only value comes from the deferred phase.
    ///
    /// Used when the cache phase had nothing to contribute; a suppressed
    /// deferred phase turns into an error, since a read must produce at
    /// least one value.
    #[must_use]
    pub fn deferred(only: impl FnOnce() -> Option<StoreResult<T>> + Send + 'static) -> Self {
        Self {
            first: None,
            second: Some(Box::new(only)),
        }
    }

    /// Drains the stream and returns its last value.
    pub fn final_value(self) -> StoreResult<T> {
        let mut last = None;
        for item in self {
            last = Some(item);
        }
        last.unwrap_or_else(|| Err(StoreError::invalid("read produced no value")))
    }
}

impl<T> Iterator for ReadStream<T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        match self.second.take() {
            Some(phase) => phase(),
            None => None,
        }
    }
}
