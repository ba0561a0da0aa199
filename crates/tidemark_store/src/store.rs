//! The public data store API.

use crate::error::{StoreError, StoreResult};
use crate::offline::OfflineRepository;
use crate::options::{CollectionRef, PullOptions, StoreMode, StoreOptions};
use crate::processor::DataProcessor;
use crate::query_cache::QueryCache;
use crate::read_stream::ReadStream;
use crate::sync_manager::{PushResult, SyncManager, SyncOutcome};
use crate::sync_state::{SyncItem, SyncStateManager};
use std::sync::Arc;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};

/// A handle to one collection in one store mode.
///
/// Obtained from [`crate::Client::collection`]. Handles are cheap to
/// clone conceptually (all state is shared); two handles over the same
/// `(collection, tag)` observe the same local cache and sync queue.
pub struct DataStore {
    collection: CollectionRef,
    mode: StoreMode,
    processor: Arc<dyn DataProcessor>,
    offline: Arc<OfflineRepository>,
    sync_state: Arc<SyncStateManager>,
    query_cache: Arc<QueryCache>,
    sync_manager: Arc<SyncManager>,
    options: StoreOptions,
}

impl DataStore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        collection: CollectionRef,
        mode: StoreMode,
        processor: Arc<dyn DataProcessor>,
        offline: Arc<OfflineRepository>,
        sync_state: Arc<SyncStateManager>,
        query_cache: Arc<QueryCache>,
        sync_manager: Arc<SyncManager>,
        options: StoreOptions,
    ) -> Self {
        Self {
            collection,
            mode,
            processor,
            offline,
            sync_state,
            query_cache,
            sync_manager,
            options,
        }
    }

    /// Returns the backend collection name.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        &self.collection.name
    }

    /// Returns the local partition tag, if any.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.collection.tag.as_deref()
    }

    /// Returns the store mode.
    #[must_use]
    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    fn require_local_state(&self, operation: &str) -> StoreResult<()> {
        if self.mode.uses_cache() {
            Ok(())
        } else {
            Err(StoreError::invalid(format!(
                "{operation} is not supported by a Network store"
            )))
        }
    }

    /// Finds entities matching the query.
    ///
    /// Sync stores read the cache, Network stores the backend; Cache
    /// stores emit the cached result first and the network-reconciled
    /// result second.
    pub fn find(&self, query: Option<&Query>) -> ReadStream<Vec<Entity>> {
        self.processor.find(query)
    }

    /// Finds one entity by id. Same dispatch as [`DataStore::find`].
    pub fn find_by_id(&self, id: &str) -> ReadStream<Entity> {
        self.processor.find_by_id(id)
    }

    /// Counts entities matching the query.
    pub fn count(&self, query: Option<&Query>) -> ReadStream<u64> {
        self.processor.count(query)
    }

    /// Runs a grouped aggregation.
    pub fn group(&self, aggregation: &Aggregation) -> ReadStream<Vec<JsonObject>> {
        self.processor.group(aggregation)
    }

    /// Creates one entity.
    ///
    /// Sync and Cache stores mint an id when none is present, stamp the
    /// local-origin marker and record a create intent; Network stores
    /// POST directly.
    pub fn create(&self, entity: Entity) -> StoreResult<Entity> {
        let mut created = self.processor.create(vec![entity])?;
        created
            .pop()
            .ok_or_else(|| StoreError::invalid("create returned no entity"))
    }

    /// Creates several entities.
    pub fn create_many(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        self.processor.create(entities)
    }

    /// Updates an entity, which must carry an `_id`.
    pub fn update(&self, entity: Entity) -> StoreResult<Entity> {
        if entity.id().is_none() {
            return Err(StoreError::invalid(
                "the entity lacks an _id; use create (or save) for new entities",
            ));
        }
        self.processor.update(entity)
    }

    /// Creates or updates based on `_id` presence.
    pub fn save(&self, entity: Entity) -> StoreResult<Entity> {
        if entity.id().is_some() {
            self.update(entity)
        } else {
            self.create(entity)
        }
    }

    /// Removes entities matching the query. Returns the removed count.
    pub fn remove(&self, query: Option<&Query>) -> StoreResult<u64> {
        self.processor.remove(query)
    }

    /// Removes one entity by id. An empty id is a no-op returning 0.
    pub fn remove_by_id(&self, id: &str) -> StoreResult<u64> {
        if id.is_empty() {
            return Ok(0);
        }
        self.processor.remove_by_id(id)
    }

    /// Pushes pending local mutations. Cache and Sync stores only.
    pub fn push(&self, query: Option<&Query>) -> StoreResult<Vec<PushResult>> {
        self.require_local_state("push")?;
        self.sync_manager.push(&self.collection, query)
    }

    /// Pulls entities into the cache using this store's configured pull
    /// options. Cache and Sync stores only.
    pub fn pull(&self, query: Option<&Query>) -> StoreResult<u64> {
        self.pull_with(query, &self.options.pull_options())
    }

    /// Pulls with explicit options.
    pub fn pull_with(&self, query: Option<&Query>, options: &PullOptions) -> StoreResult<u64> {
        self.require_local_state("pull")?;
        self.sync_manager.pull(&self.collection, query, options)
    }

    /// Pushes, then pulls. Cache and Sync stores only.
    pub fn sync(&self, query: Option<&Query>) -> StoreResult<SyncOutcome> {
        self.require_local_state("sync")?;
        self.sync_manager
            .sync(&self.collection, query, &self.options.pull_options())
    }

    /// Counts pending sync items matching the query.
    pub fn pending_sync_count(&self, query: Option<&Query>) -> StoreResult<u64> {
        self.require_local_state("pendingSyncCount")?;
        self.sync_manager.pending_count(&self.collection, query)
    }

    /// Returns pending sync items matching the query.
    pub fn pending_sync_entities(&self, query: Option<&Query>) -> StoreResult<Vec<SyncItem>> {
        self.require_local_state("pendingSyncEntities")?;
        self.sync_manager.pending_items(&self.collection, query)
    }

    /// Discards pending sync items matching the query without pushing
    /// them. Returns the discarded count.
    pub fn clear_sync(&self, query: Option<&Query>) -> StoreResult<u64> {
        self.require_local_state("clearSync")?;
        self.sync_manager.clear_pending(&self.collection, query)
    }

    /// Removes entities matching the query from the offline cache, along
    /// with their sync items. Any cached delta-set timestamps for the
    /// collection are invalidated. Returns the removed entity count.
    pub fn clear(&self, query: Option<&Query>) -> StoreResult<u64> {
        self.require_local_state("clear")?;
        let local = self.collection.local_name();

        let ids: Vec<String> = self
            .offline
            .read(&local, query)?
            .iter()
            .filter_map(|entity| entity.id().map(str::to_string))
            .collect();
        let removed = self.offline.delete(&local, query)?;
        self.sync_state.remove_for_ids(&local, &ids)?;
        // A partial cache can no longer satisfy delta-set deltas.
        self.query_cache.remove_collection(&local)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientConfig};
    use serde_json::json;
    use tidemark_net::MockClient;
    use tidemark_persist::MemoryPersister;

    fn client() -> (Arc<MockClient>, Client) {
        let http = Arc::new(MockClient::new());
        let client = Client::new(
            ClientConfig::new("app1", "secret").with_master_secret("master"),
            Arc::new(MemoryPersister::new()),
            http.clone(),
        )
        .unwrap();
        (http, client)
    }

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    #[test]
    fn network_store_rejects_sync_surface() {
        let (_, client) = client();
        let store = client
            .collection("books", StoreMode::Network, StoreOptions::new())
            .unwrap();

        assert!(store.push(None).unwrap_err().to_string().contains("push"));
        assert!(store.pull(None).is_err());
        assert!(store.sync(None).is_err());
        assert!(store.pending_sync_count(None).is_err());
        assert!(store.clear_sync(None).is_err());
        assert!(store.clear(None).is_err());
    }

    #[test]
    fn update_without_id_is_a_validation_error() {
        let (_, client) = client();
        let store = client
            .collection("books", StoreMode::Sync, StoreOptions::new())
            .unwrap();

        let result = store.update(entity(json!({"title": "A"})));
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn save_dispatches_on_id_presence() {
        let (_, client) = client();
        let store = client
            .collection("books", StoreMode::Sync, StoreOptions::new())
            .unwrap();

        let created = store.save(entity(json!({"title": "A"}))).unwrap();
        assert!(created.id().is_some());
        assert_eq!(store.pending_sync_count(None).unwrap(), 1);

        let mut changed = created.clone();
        changed.set("title", json!("B"));
        store.save(changed).unwrap();

        // Still a single (create) intent for the entity.
        assert_eq!(store.pending_sync_count(None).unwrap(), 1);
        let items = store.pending_sync_entities(None).unwrap();
        assert_eq!(items[0].operation().as_str(), "Create");
    }

    #[test]
    fn remove_by_id_with_empty_id_is_a_noop() {
        let (_, client) = client();
        let store = client
            .collection("books", StoreMode::Sync, StoreOptions::new())
            .unwrap();
        assert_eq!(store.remove_by_id("").unwrap(), 0);
    }

    #[test]
    fn clear_drops_entities_sync_items_and_cached_queries() {
        let (_, client) = client();
        let store = client
            .collection("books", StoreMode::Cache, StoreOptions::new())
            .unwrap();

        // Seed local state without touching the network.
        let sync_store = client
            .collection("books", StoreMode::Sync, StoreOptions::new())
            .unwrap();
        sync_store.create(entity(json!({"title": "A"}))).unwrap();
        store
            .sync_manager
            .pending_count(&store.collection, None)
            .unwrap();

        assert_eq!(store.clear(None).unwrap(), 1);
        assert_eq!(store.pending_sync_count(None).unwrap(), 0);
        assert!(store.find(None).next().unwrap().unwrap().is_empty());
    }

    #[test]
    fn handles_over_the_same_tag_share_state() {
        let (_, client) = client();
        let options = StoreOptions::new().with_tag("draft");
        let a = client
            .collection("books", StoreMode::Sync, options.clone())
            .unwrap();
        let b = client
            .collection("books", StoreMode::Sync, options)
            .unwrap();
        let untagged = client
            .collection("books", StoreMode::Sync, StoreOptions::new())
            .unwrap();

        a.create(entity(json!({"title": "A"}))).unwrap();
        assert_eq!(b.find(None).final_value().unwrap().len(), 1);
        assert!(untagged.find(None).final_value().unwrap().is_empty());
        assert_eq!(b.pending_sync_count(None).unwrap(), 1);
        assert_eq!(untagged.pending_sync_count(None).unwrap(), 0);
    }
}
