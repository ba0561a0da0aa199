//! The pending-operation log.

use crate::error::{StoreError, StoreResult};
use crate::offline::OfflineRepository;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tidemark_model::{mint_id, Entity, Filter, Query};

/// Reserved collection holding [`SyncItem`] records.
pub const SYNC_COLLECTION: &str = "kinvey_sync";

/// A pending local mutation awaiting push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOperation {
    /// The entity was created offline and must be POSTed.
    Create,
    /// The entity was modified offline and must be PUT.
    Update,
    /// The entity was deleted offline and must be DELETEd.
    Delete,
}

impl PendingOperation {
    /// Returns the operation name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PendingOperation::Create => "Create",
            PendingOperation::Update => "Update",
            PendingOperation::Delete => "Delete",
        }
    }
}

/// The state envelope of a sync item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItemState {
    /// The pending operation.
    pub operation: PendingOperation,
}

/// One pending mutation intent.
///
/// Invariant: at most one sync item exists per `(collection, entityId)`;
/// recording a new intent merges with any existing one (see
/// [`SyncStateManager`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Record id within the reserved collection.
    #[serde(rename = "_id")]
    pub id: String,
    /// The id of the entity the intent refers to.
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// The local collection name (tag included).
    pub collection: String,
    /// The pending operation.
    pub state: SyncItemState,
}

impl SyncItem {
    /// Returns the pending operation.
    #[must_use]
    pub fn operation(&self) -> PendingOperation {
        self.state.operation
    }
}

/// Tracks pending create/update/delete intents per entity.
///
/// Items persist in the reserved `kinvey_sync` collection. Recording an
/// intent for an entity that already has one merges per the table:
///
/// | previous | new    | result                                        |
/// |----------|--------|-----------------------------------------------|
/// | Create   | Update | Create (payload is whatever is cached)        |
/// | Create   | Delete | item dropped, offline entity removed          |
/// | Update   | Update | Update                                        |
/// | Update   | Delete | Delete                                        |
/// | Delete   | any    | error - the entity is a tombstone             |
pub struct SyncStateManager {
    offline: Arc<OfflineRepository>,
}

impl SyncStateManager {
    /// Creates a manager over the offline repository.
    pub fn new(offline: Arc<OfflineRepository>) -> Self {
        Self { offline }
    }

    fn load(&self, collection: &str) -> StoreResult<Vec<SyncItem>> {
        let entities = self.offline.read(SYNC_COLLECTION, None)?;
        let mut items = Vec::new();
        for entity in entities {
            let item: SyncItem = serde_json::from_value(entity.to_value())?;
            if item.collection == collection {
                items.push(item);
            }
        }
        Ok(items)
    }

    fn save(&self, item: &SyncItem) -> StoreResult<()> {
        let entity = Entity::from_value(serde_json::to_value(item)?)?;
        self.offline.update(SYNC_COLLECTION, vec![entity])?;
        Ok(())
    }

    fn remove_record(&self, id: &str) -> StoreResult<u64> {
        self.offline.delete_by_id(SYNC_COLLECTION, id)
    }

    fn entity_ids(entities: &[Entity]) -> StoreResult<Vec<String>> {
        entities
            .iter()
            .map(|entity| {
                entity
                    .id()
                    .map(str::to_string)
                    .ok_or_else(|| StoreError::sync("cannot record an intent without an _id"))
            })
            .collect()
    }

    /// Records create intents for the entities.
    pub fn add_create(&self, collection: &str, entities: &[Entity]) -> StoreResult<()> {
        for entity_id in Self::entity_ids(entities)? {
            self.merge(collection, &entity_id, PendingOperation::Create)?;
        }
        Ok(())
    }

    /// Records update intents for the entities.
    pub fn add_update(&self, collection: &str, entities: &[Entity]) -> StoreResult<()> {
        for entity_id in Self::entity_ids(entities)? {
            self.merge(collection, &entity_id, PendingOperation::Update)?;
        }
        Ok(())
    }

    /// Records delete intents for the entities.
    ///
    /// A delete against a never-pushed create drops the item entirely and
    /// removes the offline entity; nothing is ever pushed for it.
    pub fn add_delete(&self, collection: &str, entities: &[Entity]) -> StoreResult<()> {
        for entity_id in Self::entity_ids(entities)? {
            self.merge(collection, &entity_id, PendingOperation::Delete)?;
        }
        Ok(())
    }

    /// Records a delete intent by entity id.
    pub fn add_delete_by_id(&self, collection: &str, entity_id: &str) -> StoreResult<()> {
        self.merge(collection, entity_id, PendingOperation::Delete)
    }

    fn merge(
        &self,
        collection: &str,
        entity_id: &str,
        operation: PendingOperation,
    ) -> StoreResult<()> {
        let existing = self
            .load(collection)?
            .into_iter()
            .find(|item| item.entity_id == entity_id);

        let Some(previous) = existing else {
            return self.save(&SyncItem {
                id: mint_id(),
                entity_id: entity_id.to_string(),
                collection: collection.to_string(),
                state: SyncItemState { operation },
            });
        };

        match (previous.operation(), operation) {
            (PendingOperation::Delete, _) => Err(StoreError::sync(format!(
                "entity {entity_id} in {collection} already has a pending delete"
            ))),
            (PendingOperation::Create, PendingOperation::Delete) => {
                self.remove_record(&previous.id)?;
                self.offline.delete_by_id(collection, entity_id)?;
                Ok(())
            }
            // Create absorbs further writes; the pushed payload is
            // whatever the cache holds at push time.
            (PendingOperation::Create, _) => Ok(()),
            (PendingOperation::Update, PendingOperation::Delete) => {
                let mut item = previous;
                item.state.operation = PendingOperation::Delete;
                self.save(&item)
            }
            (PendingOperation::Update, _) => Ok(()),
        }
    }

    /// Returns pending items for a collection, optionally narrowed to a
    /// set of entity ids.
    pub fn items(
        &self,
        collection: &str,
        entity_ids: Option<&[String]>,
    ) -> StoreResult<Vec<SyncItem>> {
        let items = self.load(collection)?;
        Ok(match entity_ids {
            Some(ids) => items
                .into_iter()
                .filter(|item| ids.iter().any(|id| *id == item.entity_id))
                .collect(),
            None => items,
        })
    }

    /// Counts pending items for a collection.
    pub fn count(&self, collection: &str, entity_ids: Option<&[String]>) -> StoreResult<u64> {
        Ok(self.items(collection, entity_ids)?.len() as u64)
    }

    /// Removes the item for one entity id. Returns true if one existed.
    pub fn remove_for_entity_id(&self, collection: &str, entity_id: &str) -> StoreResult<bool> {
        let removed = self.remove_for_ids(collection, std::slice::from_ref(&entity_id.to_string()))?;
        Ok(removed > 0)
    }

    /// Removes the items for the given entity ids. Returns the removed
    /// count.
    pub fn remove_for_ids(&self, collection: &str, entity_ids: &[String]) -> StoreResult<u64> {
        let values: Vec<Value> = entity_ids.iter().cloned().map(Value::String).collect();
        let query = Query::new().filter(
            Filter::eq("collection", collection).and(Filter::within("entityId", values)),
        );
        self.offline.delete(SYNC_COLLECTION, Some(&query))
    }

    /// Removes every item for a collection. Returns the removed count.
    pub fn remove_all(&self, collection: &str) -> StoreResult<u64> {
        let query = Query::new().filter(Filter::eq("collection", collection));
        self.offline.delete(SYNC_COLLECTION, Some(&query))
    }
}
