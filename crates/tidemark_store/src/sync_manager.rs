//! Push and pull orchestration.

use crate::error::{StoreError, StoreResult};
use crate::offline::OfflineRepository;
use crate::options::{CollectionRef, PendingSyncPolicy, PullOptions, SyncLimits};
use crate::query_cache::QueryCache;
use crate::sync_state::{PendingOperation, SyncItem, SyncStateManager};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use tidemark_model::{Entity, Filter, Query};
use tidemark_net::{NetError, NetworkRepository};
use tracing::{debug, warn};

/// The outcome of pushing one sync item.
///
/// `entity_id` is the id the intent was recorded under - for creates,
/// the locally minted id, even though `entity` carries the
/// server-assigned one.
#[derive(Debug)]
pub struct PushResult {
    /// The entity id the intent referred to.
    pub entity_id: String,
    /// The pushed operation.
    pub operation: PendingOperation,
    /// The server's entity, for successful creates and updates.
    pub entity: Option<Entity>,
    /// The failure, when the item could not be pushed. The sync item
    /// stays queued so the next push retries it.
    pub error: Option<StoreError>,
}

impl PushResult {
    /// Returns true if the item was pushed and its intent cleared.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// The outcome of a full sync cycle.
#[derive(Debug)]
pub struct SyncOutcome {
    /// Per-item push results.
    pub push: Vec<PushResult>,
    /// Number of entities pulled.
    pub pull: u64,
}

/// Orchestrates push and pull between the offline cache and the backend.
///
/// One manager exists per app key; every store handle shares it, which is
/// what makes the per-collection push marker an effective mutual-exclusion
/// point across handles.
pub struct SyncManager {
    offline: Arc<OfflineRepository>,
    sync_state: Arc<SyncStateManager>,
    query_cache: Arc<QueryCache>,
    network: Arc<NetworkRepository>,
    limits: SyncLimits,
    push_tracking: Mutex<HashSet<String>>,
}

impl SyncManager {
    /// Creates a sync manager.
    pub fn new(
        offline: Arc<OfflineRepository>,
        sync_state: Arc<SyncStateManager>,
        query_cache: Arc<QueryCache>,
        network: Arc<NetworkRepository>,
        limits: SyncLimits,
    ) -> Self {
        Self {
            offline,
            sync_state,
            query_cache,
            network,
            limits,
            push_tracking: Mutex::new(HashSet::new()),
        }
    }

    /// Returns the pending sync items matching the query.
    ///
    /// With a query, only items whose entity currently matches it in the
    /// offline cache are selected; delete intents (whose entities are
    /// gone from the cache) never match a query.
    pub fn pending_items(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
    ) -> StoreResult<Vec<SyncItem>> {
        let local = collection.local_name();
        match query {
            None => self.sync_state.items(&local, None),
            Some(query) => {
                let ids: Vec<String> = self
                    .offline
                    .read(&local, Some(query))?
                    .iter()
                    .filter_map(|entity| entity.id().map(str::to_string))
                    .collect();
                self.sync_state.items(&local, Some(&ids))
            }
        }
    }

    /// Counts the pending sync items matching the query.
    pub fn pending_count(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
    ) -> StoreResult<u64> {
        Ok(self.pending_items(collection, query)?.len() as u64)
    }

    /// Discards the pending sync items matching the query.
    pub fn clear_pending(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
    ) -> StoreResult<u64> {
        let local = collection.local_name();
        match query {
            None => self.sync_state.remove_all(&local),
            Some(_) => {
                let ids: Vec<String> = self
                    .pending_items(collection, query)?
                    .into_iter()
                    .map(|item| item.entity_id)
                    .collect();
                self.sync_state.remove_for_ids(&local, &ids)
            }
        }
    }

    /// Pushes pending local mutations to the backend.
    ///
    /// At most one push runs per collection; a second concurrent call
    /// fails with a sync error. Per-item failures are captured on the
    /// result records and never abort the batch.
    pub fn push(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
    ) -> StoreResult<Vec<PushResult>> {
        let _guard = self.begin_push(collection)?;
        let items = self.pending_items(collection, query)?;
        Ok(self.run_push(collection, &items))
    }

    /// Pushes the pending items for specific entity ids, regardless of
    /// whether their entities still exist in the cache. Used by
    /// cache-mode writes to flush the intents they just recorded.
    pub(crate) fn push_for_ids(
        &self,
        collection: &CollectionRef,
        entity_ids: &[String],
    ) -> StoreResult<Vec<PushResult>> {
        let _guard = self.begin_push(collection)?;
        let items = self
            .sync_state
            .items(&collection.local_name(), Some(entity_ids))?;
        Ok(self.run_push(collection, &items))
    }

    fn begin_push(&self, collection: &CollectionRef) -> StoreResult<PushGuard<'_>> {
        let local = collection.local_name();
        let mut tracking = self.push_tracking.lock();
        if !tracking.insert(local.clone()) {
            return Err(StoreError::sync(format!(
                "a push is already in progress for collection {local}"
            )));
        }
        Ok(PushGuard {
            manager: self,
            collection: local,
        })
    }

    fn run_push(&self, collection: &CollectionRef, items: &[SyncItem]) -> Vec<PushResult> {
        let mut results = Vec::with_capacity(items.len());
        let limit = self.limits.max_concurrent_push.max(1);

        for chunk in items.chunks(limit) {
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|item| scope.spawn(move || self.push_item(collection, item)))
                    .collect();
                for (handle, item) in handles.into_iter().zip(chunk) {
                    results.push(handle.join().unwrap_or_else(|_| PushResult {
                        entity_id: item.entity_id.clone(),
                        operation: item.operation(),
                        entity: None,
                        error: Some(StoreError::sync("push worker panicked")),
                    }));
                }
            });
        }
        results
    }

    fn push_item(&self, collection: &CollectionRef, item: &SyncItem) -> PushResult {
        match self.push_item_inner(collection, item) {
            Ok(entity) => PushResult {
                entity_id: item.entity_id.clone(),
                operation: item.operation(),
                entity,
                error: None,
            },
            Err(error) => PushResult {
                entity_id: item.entity_id.clone(),
                operation: item.operation(),
                entity: None,
                error: Some(error),
            },
        }
    }

    fn push_item_inner(
        &self,
        collection: &CollectionRef,
        item: &SyncItem,
    ) -> StoreResult<Option<Entity>> {
        let local = collection.local_name();
        match item.operation() {
            PendingOperation::Create => {
                let entity = self.load_for_push(&local, item)?;
                let mut outbound = entity;
                outbound.strip_local_markers();

                let created = self.network.create(&collection.name, &outbound)?;
                // The server assigned a new id: re-home the cached entity.
                self.offline.delete_by_id(&local, &item.entity_id)?;
                self.offline.update(&local, vec![created.clone()])?;
                self.sync_state
                    .remove_for_entity_id(&local, &item.entity_id)?;
                Ok(Some(created))
            }
            PendingOperation::Update => {
                let entity = self.load_for_push(&local, item)?;
                let updated = self.network.update(&collection.name, &entity)?;
                self.offline.update(&local, vec![updated.clone()])?;
                self.sync_state
                    .remove_for_entity_id(&local, &item.entity_id)?;
                Ok(Some(updated))
            }
            PendingOperation::Delete => {
                match self.network.delete_by_id(&collection.name, &item.entity_id) {
                    Ok(_) => {}
                    // The server already lost the entity; the intent is moot.
                    Err(NetError::NotFound(_)) => {}
                    Err(error) => return Err(error.into()),
                }
                self.sync_state
                    .remove_for_entity_id(&local, &item.entity_id)?;
                Ok(None)
            }
        }
    }

    /// Loads the entity behind an intent; a vanished entity drops the
    /// intent and fails the item.
    fn load_for_push(&self, local: &str, item: &SyncItem) -> StoreResult<Entity> {
        match self.offline.read_by_id(local, &item.entity_id) {
            Ok(entity) => Ok(entity),
            Err(error) if error.is_not_found() => {
                let _ = self
                    .sync_state
                    .remove_for_entity_id(local, &item.entity_id);
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Pulls entities from the backend into the offline cache.
    ///
    /// Dispatches between delta-set, auto-pagination and a regular fetch;
    /// see the crate docs for the selection rules. Returns the number of
    /// entities fetched.
    pub fn pull(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
        options: &PullOptions,
    ) -> StoreResult<u64> {
        let local = collection.local_name();

        let pending = self.pending_count(collection, query)?;
        if pending > 0 {
            match self.limits.pending_policy {
                PendingSyncPolicy::PushFirst => {
                    debug!(collection = %local, pending, "pushing pending entities before pull");
                    self.push(collection, query)?;
                }
                PendingSyncPolicy::Fail => {
                    return Err(StoreError::sync(format!(
                        "cannot pull collection {local}: {pending} entities are pending push"
                    )));
                }
            }
        }

        let bounded = query.is_some_and(Query::is_bounded);
        if options.auto_pagination && !bounded {
            return self.paginated_pull(collection, query, options);
        }

        // Delta-set needs an unbounded query and a previous high-water
        // mark; with no cached query this is a forced full pull.
        if options.use_delta_set && !bounded {
            let canonical = canonical_for(query);
            if let Some(cached) = self.query_cache.get(&local, &canonical)? {
                if !cached.last_request.is_empty() {
                    match self.delta_pull(collection, query, &cached.last_request) {
                        Ok(count) => return Ok(count),
                        Err(error) if error.requires_delta_fallback() => {
                            warn!(collection = %local, %error, "delta-set rejected; falling back to a full pull");
                            self.query_cache.remove(&local, &canonical)?;
                        }
                        Err(error) => return Err(error),
                    }
                }
            }
        }

        self.full_pull(collection, query, bounded)
    }

    /// Full sync cycle: push, then pull.
    pub fn sync(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
        options: &PullOptions,
    ) -> StoreResult<SyncOutcome> {
        let push = self.push(collection, query)?;
        let pull = self.pull(collection, query, options)?;
        Ok(SyncOutcome { push, pull })
    }

    fn delta_pull(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
        since: &str,
    ) -> StoreResult<u64> {
        let local = collection.local_name();
        let fetched = self.network.delta_set(&collection.name, since, query)?;
        let page = fetched.data;

        if !page.deleted.is_empty() {
            let ids: Vec<Value> = page.deleted.iter().cloned().map(Value::String).collect();
            let gone = Query::new().filter(Filter::within("_id", ids));
            self.offline.delete(&local, Some(&gone))?;
        }
        let changed = page.changed.len() as u64;
        if !page.changed.is_empty() {
            self.offline.update(&local, page.changed)?;
        }

        if let Some(request_start) = fetched.request_start {
            self.query_cache
                .upsert(&local, &canonical_for(query), &request_start)?;
        }
        Ok(changed)
    }

    fn full_pull(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
        bounded: bool,
    ) -> StoreResult<u64> {
        let local = collection.local_name();
        let fetched = self.network.find(&collection.name, query)?;
        let count = fetched.data.len() as u64;

        if bounded {
            // A window must not orphan entities outside itself.
            self.offline.update(&local, fetched.data)?;
        } else {
            // Replace the offline snapshot for the query.
            self.offline.delete(&local, query)?;
            self.offline.update(&local, fetched.data)?;
        }

        if let Some(request_start) = fetched.request_start {
            self.query_cache
                .upsert(&local, &canonical_for(query), &request_start)?;
        }
        Ok(count)
    }

    fn paginated_pull(
        &self,
        collection: &CollectionRef,
        query: Option<&Query>,
        options: &PullOptions,
    ) -> StoreResult<u64> {
        let local = collection.local_name();
        let counted = self.network.count(&collection.name, query)?;
        let total = counted.data;
        let page_size = options
            .page_size
            .unwrap_or(self.limits.default_page_size)
            .max(1);
        let pages = total.div_ceil(page_size);
        debug!(collection = %local, total, pages, page_size, "starting paginated pull");

        self.offline.delete(&local, None)?;

        let base = query.cloned().unwrap_or_default().with_stable_sort();
        let page_queries: Vec<Query> = (0..pages)
            .map(|page| base.clone().skip(page * page_size).limit(page_size))
            .collect();

        let mut fetched_total = 0u64;
        let limit = self.limits.max_concurrent_pull.max(1);
        for chunk in page_queries.chunks(limit) {
            let mut page_results: Vec<StoreResult<Vec<Entity>>> = Vec::with_capacity(chunk.len());
            thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|page_query| {
                        scope.spawn(move || {
                            self.network
                                .find(&collection.name, Some(page_query))
                                .map(|fetched| fetched.data)
                                .map_err(StoreError::from)
                        })
                    })
                    .collect();
                for handle in handles {
                    page_results.push(handle.join().unwrap_or_else(|_| {
                        Err(StoreError::sync("pull worker panicked"))
                    }));
                }
            });
            for page in page_results {
                let entities = page?;
                fetched_total += entities.len() as u64;
                self.offline.update(&local, entities)?;
            }
        }

        // The count request anchors the delta-set high-water mark: every
        // page reflects the dataset at or after that instant.
        if let Some(request_start) = counted.request_start {
            self.query_cache
                .upsert(&local, &canonical_for(query), &request_start)?;
        }
        Ok(fetched_total)
    }
}

fn canonical_for(query: Option<&Query>) -> String {
    query.map_or_else(|| Query::new().canonical(), Query::canonical)
}

struct PushGuard<'a> {
    manager: &'a SyncManager,
    collection: String,
}

impl Drop for PushGuard<'_> {
    fn drop(&mut self) {
        self.manager.push_tracking.lock().remove(&self.collection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_state::SYNC_COLLECTION;
    use serde_json::json;
    use std::sync::mpsc;
    use std::time::Duration;
    use tidemark_net::{
        AppCredentials, HttpClient, MockClient, NetConfig, NetResult, Request, RequestExecutor,
        Response, ActiveUserStore,
    };
    use tidemark_persist::MemoryPersister;

    struct Fixture {
        client: Arc<MockClient>,
        offline: Arc<OfflineRepository>,
        sync_state: Arc<SyncStateManager>,
        query_cache: Arc<QueryCache>,
        manager: SyncManager,
    }

    fn fixture_with_client(http: Arc<dyn HttpClient>) -> (Arc<OfflineRepository>, SyncManager) {
        let persister = Arc::new(MemoryPersister::new());
        let offline = Arc::new(OfflineRepository::new("app1", persister.clone()));
        let sync_state = Arc::new(SyncStateManager::new(offline.clone()));
        let query_cache = Arc::new(QueryCache::new(offline.clone()));
        let executor = RequestExecutor::new(
            NetConfig::new("https://baas.example.com", "https://auth.example.com"),
            AppCredentials::new("app1", "secret").with_master_secret("master"),
            http,
            Arc::new(ActiveUserStore::new("app1", persister)),
        )
        .unwrap();
        let network = Arc::new(NetworkRepository::new(Arc::new(executor)));
        let manager = SyncManager::new(
            offline.clone(),
            sync_state,
            query_cache,
            network,
            SyncLimits::default(),
        );
        (offline, manager)
    }

    fn fixture() -> Fixture {
        let client = Arc::new(MockClient::new());
        let persister = Arc::new(MemoryPersister::new());
        let offline = Arc::new(OfflineRepository::new("app1", persister.clone()));
        let sync_state = Arc::new(SyncStateManager::new(offline.clone()));
        let query_cache = Arc::new(QueryCache::new(offline.clone()));
        let executor = RequestExecutor::new(
            NetConfig::new("https://baas.example.com", "https://auth.example.com"),
            AppCredentials::new("app1", "secret").with_master_secret("master"),
            client.clone(),
            Arc::new(ActiveUserStore::new("app1", persister)),
        )
        .unwrap();
        let network = Arc::new(NetworkRepository::new(Arc::new(executor)));
        let manager = SyncManager::new(
            offline.clone(),
            sync_state.clone(),
            query_cache.clone(),
            network,
            SyncLimits {
                max_concurrent_push: 1,
                max_concurrent_pull: 2,
                ..SyncLimits::default()
            },
        );
        Fixture {
            client,
            offline,
            sync_state,
            query_cache,
            manager,
        }
    }

    fn books() -> CollectionRef {
        CollectionRef::new("books")
    }

    fn entity(value: serde_json::Value) -> Entity {
        Entity::from_value(value).unwrap()
    }

    #[test]
    fn push_create_rewrites_local_id() {
        let f = fixture();
        let mut local_entity = entity(json!({"title": "A"}));
        let local_id = local_entity.ensure_id();
        local_entity.mark_local();
        f.offline.create("books", vec![local_entity.clone()]).unwrap();
        f.sync_state.add_create("books", &[local_entity]).unwrap();

        f.client
            .push_json(201, json!({"_id": "srv1", "title": "A"}));

        let results = f.manager.push(&books(), None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].succeeded());
        assert_eq!(results[0].entity_id, local_id);
        assert_eq!(
            results[0].entity.as_ref().unwrap().id(),
            Some("srv1")
        );

        // Cache re-homed under the server id.
        assert!(f.offline.read_by_id("books", &local_id).is_err());
        assert!(f.offline.read_by_id("books", "srv1").is_ok());
        assert_eq!(f.sync_state.count("books", None).unwrap(), 0);

        // The pushed body carries neither the local id nor _kmd.local.
        let body: serde_json::Value =
            serde_json::from_slice(f.client.requests()[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body.get("_id"), None);
        assert_eq!(body.get("_kmd"), None);
    }

    #[test]
    fn push_failure_keeps_the_item() {
        let f = fixture();
        let mut e = entity(json!({"_id": "a1", "title": "A"}));
        e.mark_local();
        f.offline.create("books", vec![e.clone()]).unwrap();
        f.sync_state.add_create("books", &[e]).unwrap();

        f.client.push_json(500, json!({"description": "boom"}));

        let results = f.manager.push(&books(), None).unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].succeeded());
        assert_eq!(f.sync_state.count("books", None).unwrap(), 1);

        // The marker was released: a retry is possible.
        f.client.push_json(201, json!({"_id": "srv1", "title": "A"}));
        let retry = f.manager.push(&books(), None).unwrap();
        assert!(retry[0].succeeded());
    }

    #[test]
    fn push_missing_entity_drops_the_item() {
        let f = fixture();
        f.sync_state
            .add_update("books", &[entity(json!({"_id": "ghost"}))])
            .unwrap();

        let results = f.manager.push(&books(), None).unwrap();
        assert!(!results[0].succeeded());
        assert!(results[0].error.as_ref().unwrap().is_not_found());
        assert_eq!(f.sync_state.count("books", None).unwrap(), 0);
        assert_eq!(f.client.request_count(), 0);
    }

    #[test]
    fn push_delete_tolerates_server_not_found() {
        let f = fixture();
        f.offline
            .create("books", vec![entity(json!({"_id": "x", "title": "X"}))])
            .unwrap();
        f.sync_state
            .add_update("books", &[entity(json!({"_id": "x"}))])
            .unwrap();
        f.sync_state
            .add_delete("books", &[entity(json!({"_id": "x"}))])
            .unwrap();

        f.client.push_json(404, json!({"error": "EntityNotFound"}));

        let results = f.manager.push(&books(), None).unwrap();
        assert!(results[0].succeeded());
        assert_eq!(f.sync_state.count("books", None).unwrap(), 0);
    }

    #[test]
    fn concurrent_push_is_mutually_exclusive() {
        struct BlockingClient {
            release: Mutex<Option<mpsc::Receiver<()>>>,
            entered: mpsc::Sender<()>,
        }
        impl HttpClient for BlockingClient {
            fn send(&self, _request: &Request) -> NetResult<Response> {
                let receiver = self.release.lock().take();
                let _ = self.entered.send(());
                if let Some(receiver) = receiver {
                    let _ = receiver.recv_timeout(Duration::from_secs(5));
                }
                Ok(Response::json(201, &json!({"_id": "srv1"})))
            }
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let client = Arc::new(BlockingClient {
            release: Mutex::new(Some(release_rx)),
            entered: entered_tx,
        });
        let (offline, manager) = fixture_with_client(client);
        let manager = Arc::new(manager);

        let mut e = entity(json!({"_id": "a1", "title": "A"}));
        e.mark_local();
        offline.create("books", vec![e.clone()]).unwrap();
        manager
            .sync_state
            .add_create("books", &[e])
            .unwrap();

        let background = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.push(&CollectionRef::new("books"), None))
        };
        // Wait until the first push is inside the network call.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = manager.push(&books(), None);
        assert!(matches!(second, Err(StoreError::Sync(_))));

        release_tx.send(()).unwrap();
        let first = background.join().unwrap().unwrap();
        assert!(first[0].succeeded());

        // After settling, pushing is possible again.
        assert!(manager.push(&books(), None).unwrap().is_empty());
    }

    #[test]
    fn regular_pull_replaces_snapshot_for_unbounded_queries() {
        let f = fixture();
        f.offline
            .create("books", vec![entity(json!({"_id": "stale"}))])
            .unwrap();

        f.client.push_response(
            Response::json(200, &json!([{"_id": "1"}, {"_id": "2"}]))
                .with_header("X-Kinvey-Request-Start", "T1"),
        );

        let pulled = f
            .manager
            .pull(&books(), None, &PullOptions::default())
            .unwrap();
        assert_eq!(pulled, 2);

        let all = f.offline.read("books", None).unwrap();
        let ids: Vec<_> = all.iter().filter_map(Entity::id).collect();
        assert_eq!(ids, vec!["1", "2"]);

        let cached = f
            .query_cache
            .get("books", &Query::new().canonical())
            .unwrap()
            .unwrap();
        assert_eq!(cached.last_request, "T1");
    }

    #[test]
    fn bounded_pull_is_non_destructive() {
        let f = fixture();
        f.offline
            .create("books", vec![entity(json!({"_id": "keep"}))])
            .unwrap();

        f.client.push_json(200, json!([{"_id": "1"}]));

        let query = Query::new().limit(1);
        let pulled = f
            .manager
            .pull(&books(), Some(&query), &PullOptions::default())
            .unwrap();
        assert_eq!(pulled, 1);

        assert!(f.offline.read_by_id("books", "keep").is_ok());
        assert!(f.offline.read_by_id("books", "1").is_ok());
    }

    #[test]
    fn delta_pull_applies_changes_and_deletes() {
        let f = fixture();
        f.offline
            .create(
                "books",
                vec![entity(json!({"_id": "1"})), entity(json!({"_id": "2"}))],
            )
            .unwrap();
        f.query_cache
            .upsert("books", &Query::new().canonical(), "T1")
            .unwrap();

        f.client.push_response(
            Response::json(
                200,
                &json!({"changed": [{"_id": "3"}], "deleted": [{"_id": "2"}]}),
            )
            .with_header("X-Kinvey-Request-Start", "T2"),
        );

        let options = PullOptions {
            use_delta_set: true,
            ..PullOptions::default()
        };
        let pulled = f.manager.pull(&books(), None, &options).unwrap();
        assert_eq!(pulled, 1);

        let mut ids: Vec<String> = f
            .offline
            .read("books", None)
            .unwrap()
            .iter()
            .filter_map(|e| e.id().map(str::to_string))
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "3"]);

        assert!(f.client.requests()[0].url.contains("_deltaset?since=T1"));
        let cached = f
            .query_cache
            .get("books", &Query::new().canonical())
            .unwrap()
            .unwrap();
        assert_eq!(cached.last_request, "T2");
    }

    #[test]
    fn rejected_delta_set_falls_back_to_full_pull() {
        let f = fixture();
        f.query_cache
            .upsert("books", &Query::new().canonical(), "T-old")
            .unwrap();

        f.client.push_json(
            400,
            json!({"error": "ParameterValueOutOfRange", "description": "since is too old"}),
        );
        f.client.push_response(
            Response::json(200, &json!([{"_id": "1"}]))
                .with_header("X-Kinvey-Request-Start", "T-new"),
        );

        let options = PullOptions {
            use_delta_set: true,
            ..PullOptions::default()
        };
        let pulled = f.manager.pull(&books(), None, &options).unwrap();
        assert_eq!(pulled, 1);

        // Two requests: the rejected delta-set, then the full fetch.
        assert_eq!(f.client.request_count(), 2);
        let cached = f
            .query_cache
            .get("books", &Query::new().canonical())
            .unwrap()
            .unwrap();
        assert_eq!(cached.last_request, "T-new");
    }

    #[test]
    fn delta_set_without_cached_query_is_a_full_pull() {
        let f = fixture();
        f.client.push_json(200, json!([{"_id": "1"}]));

        let options = PullOptions {
            use_delta_set: true,
            ..PullOptions::default()
        };
        f.manager.pull(&books(), None, &options).unwrap();

        assert_eq!(f.client.request_count(), 1);
        assert!(!f.client.requests()[0].url.contains("_deltaset"));
    }

    #[test]
    fn bounded_query_bypasses_delta_set() {
        let f = fixture();
        let query = Query::new().limit(2);
        f.query_cache
            .upsert("books", &query.canonical(), "T1")
            .unwrap();

        f.client.push_json(200, json!([{"_id": "1"}, {"_id": "2"}]));

        let options = PullOptions {
            use_delta_set: true,
            ..PullOptions::default()
        };
        f.manager.pull(&books(), Some(&query), &options).unwrap();
        assert!(!f.client.requests()[0].url.contains("_deltaset"));
    }

    #[test]
    fn paginated_pull_fetches_every_page() {
        let f = fixture();
        f.offline
            .create("books", vec![entity(json!({"_id": "stale"}))])
            .unwrap();

        f.client.push_response(
            Response::json(200, &json!({"count": 5}))
                .with_header("X-Kinvey-Request-Start", "T-count"),
        );
        f.client.push_json(200, json!([{"_id": "1"}, {"_id": "2"}]));
        f.client.push_json(200, json!([{"_id": "3"}, {"_id": "4"}]));
        f.client.push_json(200, json!([{"_id": "5"}]));

        let options = PullOptions {
            auto_pagination: true,
            page_size: Some(2),
            ..PullOptions::default()
        };
        let pulled = f.manager.pull(&books(), None, &options).unwrap();
        assert_eq!(pulled, 5);
        assert_eq!(f.offline.count("books", None).unwrap(), 5);
        assert!(f.offline.read_by_id("books", "stale").is_err());

        // One count plus three pages, each with a stable sort and window.
        let requests = f.client.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[0].url.contains("_count"));
        assert!(requests[1].url.contains("limit=2"));
        assert!(requests[1].url.contains("sort="));

        let cached = f
            .query_cache
            .get("books", &Query::new().canonical())
            .unwrap()
            .unwrap();
        assert_eq!(cached.last_request, "T-count");
    }

    #[test]
    fn pull_pushes_pending_items_first() {
        let f = fixture();
        let mut e = entity(json!({"_id": "a1", "title": "A"}));
        e.mark_local();
        f.offline.create("books", vec![e.clone()]).unwrap();
        f.sync_state.add_create("books", &[e]).unwrap();

        // Create push, then the pull fetch.
        f.client.push_json(201, json!({"_id": "srv1", "title": "A"}));
        f.client.push_json(200, json!([{"_id": "srv1", "title": "A"}]));

        let pulled = f
            .manager
            .pull(&books(), None, &PullOptions::default())
            .unwrap();
        assert_eq!(pulled, 1);
        assert_eq!(f.sync_state.count("books", None).unwrap(), 0);

        let requests = f.client.requests();
        assert_eq!(requests[0].method.as_str(), "POST");
        assert_eq!(requests[1].method.as_str(), "GET");
    }

    #[test]
    fn strict_pending_policy_fails_the_pull() {
        let client = Arc::new(MockClient::new());
        let persister = Arc::new(MemoryPersister::new());
        let offline = Arc::new(OfflineRepository::new("app1", persister.clone()));
        let sync_state = Arc::new(SyncStateManager::new(offline.clone()));
        let query_cache = Arc::new(QueryCache::new(offline.clone()));
        let executor = RequestExecutor::new(
            NetConfig::new("https://baas.example.com", "https://auth.example.com"),
            AppCredentials::new("app1", "secret").with_master_secret("master"),
            client.clone(),
            Arc::new(ActiveUserStore::new("app1", persister)),
        )
        .unwrap();
        let manager = SyncManager::new(
            offline.clone(),
            sync_state.clone(),
            query_cache,
            Arc::new(NetworkRepository::new(Arc::new(executor))),
            SyncLimits {
                pending_policy: PendingSyncPolicy::Fail,
                ..SyncLimits::default()
            },
        );

        let mut e = entity(json!({"_id": "a1"}));
        e.mark_local();
        offline.create("books", vec![e.clone()]).unwrap();
        sync_state.add_create("books", &[e]).unwrap();

        let result = manager.pull(&books(), None, &PullOptions::default());
        assert!(matches!(result, Err(StoreError::Sync(_))));
        assert_eq!(client.request_count(), 0);
    }

    #[test]
    fn clear_pending_scopes_by_query() {
        let f = fixture();
        f.offline
            .create(
                "books",
                vec![
                    entity(json!({"_id": "a", "n": 1})),
                    entity(json!({"_id": "b", "n": 2})),
                ],
            )
            .unwrap();
        f.sync_state
            .add_update(
                "books",
                &[entity(json!({"_id": "a"})), entity(json!({"_id": "b"}))],
            )
            .unwrap();

        let query = Query::new().filter(Filter::eq("n", 1));
        assert_eq!(f.manager.clear_pending(&books(), Some(&query)).unwrap(), 1);
        assert_eq!(f.manager.pending_count(&books(), None).unwrap(), 1);

        assert_eq!(f.manager.clear_pending(&books(), None).unwrap(), 1);
        assert_eq!(
            f.offline.read(SYNC_COLLECTION, None).unwrap().len(),
            0
        );
    }
}
