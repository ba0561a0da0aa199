//! Delta-set high-water-mark bookkeeping.

use crate::error::StoreResult;
use crate::offline::OfflineRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidemark_model::{mint_id, Entity};

/// Reserved collection holding [`CachedQuery`] records.
pub const QUERY_CACHE_COLLECTION: &str = "_QueryCache";

/// The last server-provided timestamp for one `(collection, query)` pair.
///
/// `last_request` is the `X-Kinvey-Request-Start` header of the pull that
/// produced the record, persisted verbatim - the server decides the
/// timestamp, never the client. The next delta-set pull sends it back as
/// `since`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    /// Record id within the reserved collection.
    #[serde(rename = "_id")]
    pub id: String,
    /// The local collection name (tag included).
    pub collection: String,
    /// The canonical query serialization.
    pub query: String,
    /// The server's request-start timestamp.
    #[serde(rename = "lastRequest")]
    pub last_request: String,
}

/// Persists cached queries in the reserved `_QueryCache` collection.
///
/// At most one record exists per `(collection, canonical query)`.
pub struct QueryCache {
    offline: Arc<OfflineRepository>,
}

impl QueryCache {
    /// Creates a query cache over the offline repository.
    pub fn new(offline: Arc<OfflineRepository>) -> Self {
        Self { offline }
    }

    fn records(&self) -> StoreResult<Vec<CachedQuery>> {
        let entities = self.offline.read(QUERY_CACHE_COLLECTION, None)?;
        let mut records = Vec::with_capacity(entities.len());
        for entity in entities {
            records.push(serde_json::from_value(entity.to_value())?);
        }
        Ok(records)
    }

    fn to_entity(record: &CachedQuery) -> StoreResult<Entity> {
        Ok(Entity::from_value(serde_json::to_value(record)?)?)
    }

    /// Looks up the record for a `(collection, canonical query)` pair.
    pub fn get(&self, collection: &str, query: &str) -> StoreResult<Option<CachedQuery>> {
        Ok(self
            .records()?
            .into_iter()
            .find(|record| record.collection == collection && record.query == query))
    }

    /// Creates or updates the record for a `(collection, canonical query)`
    /// pair.
    pub fn upsert(&self, collection: &str, query: &str, last_request: &str) -> StoreResult<()> {
        let record = match self.get(collection, query)? {
            Some(mut existing) => {
                existing.last_request = last_request.to_string();
                existing
            }
            None => CachedQuery {
                id: mint_id(),
                collection: collection.to_string(),
                query: query.to_string(),
                last_request: last_request.to_string(),
            },
        };
        self.offline
            .update(QUERY_CACHE_COLLECTION, vec![Self::to_entity(&record)?])?;
        Ok(())
    }

    /// Removes the record for a `(collection, canonical query)` pair.
    /// Returns true if one existed.
    pub fn remove(&self, collection: &str, query: &str) -> StoreResult<bool> {
        match self.get(collection, query)? {
            Some(record) => {
                self.offline
                    .delete_by_id(QUERY_CACHE_COLLECTION, &record.id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes every record for a collection. Returns the removed count.
    pub fn remove_collection(&self, collection: &str) -> StoreResult<u64> {
        let mut removed = 0;
        for record in self.records()? {
            if record.collection == collection {
                removed += self
                    .offline
                    .delete_by_id(QUERY_CACHE_COLLECTION, &record.id)?;
            }
        }
        Ok(removed)
    }
}
