//! Per-mode operation routing.
//!
//! Each store mode owns a processor enforcing its invariants: the
//! Network processor talks only to the backend, the Sync processor only
//! to local state, and the Cache processor serves local state first while
//! reconciling with the backend.

mod cache;
mod local;
mod network;

pub use cache::CacheProcessor;
pub use local::SyncProcessor;
pub use network::NetworkProcessor;

use crate::error::StoreResult;
use crate::read_stream::ReadStream;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};

/// The operation set every store mode implements.
///
/// Reads return a [`ReadStream`] so Cache mode can emit its two-phase
/// results; Network and Sync streams carry exactly one value.
pub trait DataProcessor: Send + Sync {
    /// Finds entities matching the query.
    fn find(&self, query: Option<&Query>) -> ReadStream<Vec<Entity>>;

    /// Finds one entity by id.
    fn find_by_id(&self, id: &str) -> ReadStream<Entity>;

    /// Counts entities matching the query.
    fn count(&self, query: Option<&Query>) -> ReadStream<u64>;

    /// Runs a grouped aggregation.
    fn group(&self, aggregation: &Aggregation) -> ReadStream<Vec<JsonObject>>;

    /// Creates entities; returns them as persisted.
    fn create(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>>;

    /// Updates an entity (which must carry an `_id`).
    fn update(&self, entity: Entity) -> StoreResult<Entity>;

    /// Removes entities matching the query; returns the removed count.
    fn remove(&self, query: Option<&Query>) -> StoreResult<u64>;

    /// Removes one entity by id; returns 0 or 1.
    fn remove_by_id(&self, id: &str) -> StoreResult<u64>;
}
