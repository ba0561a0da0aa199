//! The offline repository: per-collection CRUD and local query evaluation
//! over an arbitrary key/value persister.

use crate::error::{StoreError, StoreResult};
use crate::keyed_queue::KeyedQueue;
use std::sync::Arc;
use tidemark_model::{Aggregation, Entity, JsonObject, Query};
use tidemark_net::ACTIVE_USER_SLOT;
use tidemark_persist::KeyValuePersister;

/// Local entity storage for one app key.
///
/// Each collection persists as a JSON array of entities under the key
/// `"<appKey>.<collection>"` (the collection name may carry a `.tag`
/// suffix, partitioning local state). Mutations for one collection are
/// serialized through a [`KeyedQueue`]; reads go straight to the
/// persister and see the last completed write.
///
/// The repository is a process-wide singleton per app key: every store
/// handle over the same collection shares it.
pub struct OfflineRepository {
    app_key: String,
    persister: Arc<dyn KeyValuePersister>,
    queue: KeyedQueue,
}

impl OfflineRepository {
    /// Creates a repository for the given app key.
    pub fn new(app_key: impl Into<String>, persister: Arc<dyn KeyValuePersister>) -> Self {
        Self {
            app_key: app_key.into(),
            persister,
            queue: KeyedQueue::new(),
        }
    }

    /// Returns the app key this repository serves.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    fn storage_key(&self, collection: &str) -> String {
        format!("{}.{collection}", self.app_key)
    }

    fn load(&self, collection: &str) -> StoreResult<Vec<Entity>> {
        match self.persister.read(&self.storage_key(collection))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    fn store(&self, collection: &str, entities: &[Entity]) -> StoreResult<()> {
        let bytes = serde_json::to_vec(entities)?;
        self.persister.write(&self.storage_key(collection), &bytes)?;
        Ok(())
    }

    /// Appends entities to a collection; returns the input unchanged.
    pub fn create(&self, collection: &str, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let key = self.storage_key(collection);
        self.queue.run(&key, || {
            let mut all = self.load(collection)?;
            all.extend(entities.iter().cloned());
            self.store(collection, &all)?;
            Ok(entities)
        })
    }

    /// Returns entities matching the query, in query order. No query
    /// returns the whole collection.
    pub fn read(&self, collection: &str, query: Option<&Query>) -> StoreResult<Vec<Entity>> {
        let all = self.load(collection)?;
        match query {
            Some(query) => Ok(query.apply(all)?),
            None => Ok(all),
        }
    }

    /// Returns the entity with the given id.
    pub fn read_by_id(&self, collection: &str, id: &str) -> StoreResult<Entity> {
        self.load(collection)?
            .into_iter()
            .find(|entity| entity.id() == Some(id))
            .ok_or_else(|| StoreError::not_found(collection, id))
    }

    /// Counts entities matching the query's filter.
    pub fn count(&self, collection: &str, query: Option<&Query>) -> StoreResult<u64> {
        let all = self.load(collection)?;
        match query {
            Some(query) => {
                let mut count = 0u64;
                for entity in &all {
                    if query.matches(entity)? {
                        count += 1;
                    }
                }
                Ok(count)
            }
            None => Ok(all.len() as u64),
        }
    }

    /// Upserts entities by `_id`; returns the input unchanged.
    pub fn update(&self, collection: &str, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        for entity in &entities {
            if entity.id().is_none() {
                return Err(StoreError::invalid(
                    "offline update requires entities with _id",
                ));
            }
        }

        let key = self.storage_key(collection);
        self.queue.run(&key, || {
            let mut all = self.load(collection)?;
            for entity in &entities {
                match all.iter_mut().find(|existing| existing.id() == entity.id()) {
                    Some(existing) => *existing = entity.clone(),
                    None => all.push(entity.clone()),
                }
            }
            self.store(collection, &all)?;
            Ok(entities)
        })
    }

    /// Deletes entities matching the query; no query empties the
    /// collection. Returns the deleted count.
    pub fn delete(&self, collection: &str, query: Option<&Query>) -> StoreResult<u64> {
        let key = self.storage_key(collection);
        self.queue.run(&key, || {
            let all = self.load(collection)?;
            let before = all.len();
            let kept = match query {
                Some(query) => {
                    let mut kept = Vec::with_capacity(all.len());
                    for entity in all {
                        if !query.matches(&entity)? {
                            kept.push(entity);
                        }
                    }
                    kept
                }
                None => Vec::new(),
            };
            let removed = (before - kept.len()) as u64;
            self.store(collection, &kept)?;
            Ok(removed)
        })
    }

    /// Deletes the entity with the given id. Returns 0 or 1.
    pub fn delete_by_id(&self, collection: &str, id: &str) -> StoreResult<u64> {
        let key = self.storage_key(collection);
        self.queue.run(&key, || {
            let mut all = self.load(collection)?;
            let before = all.len();
            all.retain(|entity| entity.id() != Some(id));
            let removed = (before - all.len()) as u64;
            if removed > 0 {
                self.store(collection, &all)?;
            }
            Ok(removed)
        })
    }

    /// Clears one collection, or - when `collection` is `None` - every
    /// collection belonging to this app key. The active-user slot is
    /// always preserved.
    pub fn clear(&self, collection: Option<&str>) -> StoreResult<()> {
        match collection {
            Some(collection) => {
                let key = self.storage_key(collection);
                self.queue.run(&key, || {
                    self.persister.remove(&key)?;
                    Ok(())
                })
            }
            None => {
                let prefix = format!("{}.", self.app_key);
                let preserved = format!("{}.{ACTIVE_USER_SLOT}", self.app_key);
                for key in self.persister.keys()? {
                    if key.starts_with(&prefix) && key != preserved {
                        self.persister.remove(&key)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluates a grouped aggregation over the collection.
    pub fn group(
        &self,
        collection: &str,
        aggregation: &Aggregation,
    ) -> StoreResult<Vec<JsonObject>> {
        let all = self.load(collection)?;
        Ok(aggregation.evaluate(&all)?)
    }
}
