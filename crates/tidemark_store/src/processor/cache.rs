//! The cache-then-network processor.

use crate::error::{StoreError, StoreResult};
use crate::offline::OfflineRepository;
use crate::options::CollectionRef;
use crate::processor::{DataProcessor, SyncProcessor};
use crate::read_stream::ReadStream;
use crate::sync_manager::SyncManager;
use std::sync::Arc;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};
use tidemark_net::NetworkRepository;
use tracing::warn;

/// Serves reads from the cache first and reconciles with the backend;
/// applies writes locally and opportunistically pushes them.
///
/// Reads emit the cached value, then - unless the network phase fails
/// transiently - the network-reconciled value. Writes delegate to the
/// local processor (intent recording included) and then flush the
/// affected intents; a failed flush leaves the intents queued for the
/// next push.
pub struct CacheProcessor {
    offline: Arc<OfflineRepository>,
    network: Arc<NetworkRepository>,
    sync_manager: Arc<SyncManager>,
    local: SyncProcessor,
    collection: CollectionRef,
}

impl CacheProcessor {
    /// Creates a processor for one collection.
    pub fn new(
        offline: Arc<OfflineRepository>,
        network: Arc<NetworkRepository>,
        sync_manager: Arc<SyncManager>,
        local: SyncProcessor,
        collection: CollectionRef,
    ) -> Self {
        Self {
            offline,
            network,
            sync_manager,
            local,
            collection,
        }
    }

    /// Pushes the intents recorded for `entity_ids` and swaps each local
    /// entity for the server's version where the push succeeded.
    fn flush(&self, entities: Vec<Entity>, entity_ids: &[String]) -> Vec<Entity> {
        let results = match self.sync_manager.push_for_ids(&self.collection, entity_ids) {
            Ok(results) => results,
            Err(error) => {
                // Another push holds the collection; the intents stay
                // queued and the local entities stand.
                warn!(%error, collection = %self.collection.local_name(), "deferred write push");
                return entities;
            }
        };

        entities
            .into_iter()
            .map(|entity| {
                let pushed = entity.id().and_then(|id| {
                    results
                        .iter()
                        .find(|result| result.entity_id == id && result.succeeded())
                        .and_then(|result| result.entity.clone())
                });
                pushed.unwrap_or(entity)
            })
            .collect()
    }

    fn flush_deletes(&self, entity_ids: &[String]) {
        if entity_ids.is_empty() {
            return;
        }
        if let Err(error) = self.sync_manager.push_for_ids(&self.collection, entity_ids) {
            warn!(%error, collection = %self.collection.local_name(), "deferred delete push");
        }
    }
}

impl DataProcessor for CacheProcessor {
    fn find(&self, query: Option<&Query>) -> ReadStream<Vec<Entity>> {
        let local_name = self.collection.local_name();
        let offline = Arc::clone(&self.offline);
        let network = Arc::clone(&self.network);
        let collection = self.collection.clone();
        let owned_query = query.cloned();

        let network_phase = move || {
            let fetched = match network.find(&collection.name, owned_query.as_ref()) {
                Ok(fetched) => fetched,
                Err(error) if error.is_transient() => {
                    warn!(%error, collection = %collection.name, "cached find stands; network phase suppressed");
                    return None;
                }
                Err(error) => return Some(Err(StoreError::from(error))),
            };

            let local_name = collection.local_name();
            let bounded = owned_query.as_ref().is_some_and(Query::is_bounded);
            let reconciled = (|| -> StoreResult<()> {
                if !bounded {
                    offline.delete(&local_name, owned_query.as_ref())?;
                }
                offline.update(&local_name, fetched.data.clone())?;
                Ok(())
            })();
            match reconciled {
                Ok(()) => Some(Ok(fetched.data)),
                Err(error) => Some(Err(error)),
            }
        };

        match self.offline.read(&local_name, query) {
            Ok(cached) => ReadStream::two_phase(Ok(cached), network_phase),
            Err(error) => {
                warn!(%error, collection = %local_name, "cache read failed; serving the network phase only");
                ReadStream::deferred(network_phase)
            }
        }
    }

    fn find_by_id(&self, id: &str) -> ReadStream<Entity> {
        let local_name = self.collection.local_name();
        let offline = Arc::clone(&self.offline);
        let network = Arc::clone(&self.network);
        let collection = self.collection.clone();
        let entity_id = id.to_string();

        let network_phase = move || {
            let entity = match network.find_by_id(&collection.name, &entity_id) {
                Ok(entity) => entity,
                Err(error) if error.is_transient() => {
                    warn!(%error, collection = %collection.name, "cached entity stands; network phase suppressed");
                    return None;
                }
                Err(error) => return Some(Err(StoreError::from(error))),
            };
            match offline.update(&collection.local_name(), vec![entity.clone()]) {
                Ok(_) => Some(Ok(entity)),
                Err(error) => Some(Err(error)),
            }
        };

        match self.offline.read_by_id(&local_name, id) {
            Ok(cached) => ReadStream::two_phase(Ok(cached), network_phase),
            Err(error) if error.is_not_found() => ReadStream::deferred(network_phase),
            Err(error) => {
                warn!(%error, collection = %local_name, "cache read failed; serving the network phase only");
                ReadStream::deferred(network_phase)
            }
        }
    }

    fn count(&self, query: Option<&Query>) -> ReadStream<u64> {
        let network = Arc::clone(&self.network);
        let collection = self.collection.clone();
        let owned_query = query.cloned();

        let network_phase = move || match network.count(&collection.name, owned_query.as_ref()) {
            Ok(fetched) => Some(Ok(fetched.data)),
            Err(error) if error.is_transient() => None,
            Err(error) => Some(Err(StoreError::from(error))),
        };

        match self.offline.count(&self.collection.local_name(), query) {
            Ok(cached) => ReadStream::two_phase(Ok(cached), network_phase),
            Err(error) => {
                warn!(%error, "cached count failed; serving the network phase only");
                ReadStream::deferred(network_phase)
            }
        }
    }

    fn group(&self, aggregation: &Aggregation) -> ReadStream<Vec<JsonObject>> {
        let network = Arc::clone(&self.network);
        let collection = self.collection.clone();
        let aggregation_owned = aggregation.clone();

        let network_phase = move || match network.group(&collection.name, &aggregation_owned) {
            Ok(rows) => Some(Ok(rows)),
            Err(error) if error.is_transient() => None,
            Err(error) => Some(Err(StoreError::from(error))),
        };

        match self
            .offline
            .group(&self.collection.local_name(), aggregation)
        {
            Ok(cached) => ReadStream::two_phase(Ok(cached), network_phase),
            Err(error) => {
                warn!(%error, "cached aggregation failed; serving the network phase only");
                ReadStream::deferred(network_phase)
            }
        }
    }

    fn create(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let created = self.local.create(entities)?;
        let ids: Vec<String> = created
            .iter()
            .filter_map(|entity| entity.id().map(str::to_string))
            .collect();
        Ok(self.flush(created, &ids))
    }

    fn update(&self, entity: Entity) -> StoreResult<Entity> {
        let updated = self.local.update(entity)?;
        let ids: Vec<String> = updated.id().map(str::to_string).into_iter().collect();
        let mut flushed = self.flush(vec![updated], &ids);
        Ok(flushed.pop().unwrap_or_default())
    }

    fn remove(&self, query: Option<&Query>) -> StoreResult<u64> {
        let ids: Vec<String> = self
            .offline
            .read(&self.collection.local_name(), query)?
            .iter()
            .filter_map(|entity| entity.id().map(str::to_string))
            .collect();
        let removed = self.local.remove(query)?;
        self.flush_deletes(&ids);
        Ok(removed)
    }

    fn remove_by_id(&self, id: &str) -> StoreResult<u64> {
        let removed = self.local.remove_by_id(id)?;
        if removed > 0 {
            self.flush_deletes(std::slice::from_ref(&id.to_string()));
        }
        Ok(removed)
    }
}
