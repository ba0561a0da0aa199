//! The network-only processor.

use crate::error::StoreResult;
use crate::processor::DataProcessor;
use crate::read_stream::ReadStream;
use std::sync::Arc;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};
use tidemark_net::NetworkRepository;

/// Routes every operation to the backend; no local side effects.
pub struct NetworkProcessor {
    network: Arc<NetworkRepository>,
    collection: String,
}

impl NetworkProcessor {
    /// Creates a processor for one backend collection.
    pub fn new(network: Arc<NetworkRepository>, collection: impl Into<String>) -> Self {
        Self {
            network,
            collection: collection.into(),
        }
    }
}

impl DataProcessor for NetworkProcessor {
    fn find(&self, query: Option<&Query>) -> ReadStream<Vec<Entity>> {
        ReadStream::single(
            self.network
                .find(&self.collection, query)
                .map(|fetched| fetched.data)
                .map_err(Into::into),
        )
    }

    fn find_by_id(&self, id: &str) -> ReadStream<Entity> {
        ReadStream::single(
            self.network
                .find_by_id(&self.collection, id)
                .map_err(Into::into),
        )
    }

    fn count(&self, query: Option<&Query>) -> ReadStream<u64> {
        ReadStream::single(
            self.network
                .count(&self.collection, query)
                .map(|fetched| fetched.data)
                .map_err(Into::into),
        )
    }

    fn group(&self, aggregation: &Aggregation) -> ReadStream<Vec<JsonObject>> {
        ReadStream::single(
            self.network
                .group(&self.collection, aggregation)
                .map_err(Into::into),
        )
    }

    fn create(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let mut created = Vec::with_capacity(entities.len());
        for entity in &entities {
            created.push(self.network.create(&self.collection, entity)?);
        }
        Ok(created)
    }

    fn update(&self, entity: Entity) -> StoreResult<Entity> {
        Ok(self.network.update(&self.collection, &entity)?)
    }

    fn remove(&self, query: Option<&Query>) -> StoreResult<u64> {
        Ok(self.network.delete(&self.collection, query)?)
    }

    fn remove_by_id(&self, id: &str) -> StoreResult<u64> {
        Ok(self.network.delete_by_id(&self.collection, id)?)
    }
}
