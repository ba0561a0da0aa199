//! # Tidemark Store
//!
//! The offline-capable data store core: read, write, query and aggregate
//! entities against a JSON backend while transparently caching results
//! locally and synchronizing local mutations back.
//!
//! The building blocks:
//! - [`Client`]: credentials, transport, and the shared local-state
//!   singletons; [`Client::collection`] is the store factory
//! - [`DataStore`]: the public API in one of three [`StoreMode`]s
//! - [`OfflineRepository`]: local CRUD + query evaluation over a
//!   [`tidemark_persist::KeyValuePersister`]
//! - [`SyncStateManager`]: the pending-operation log
//! - [`SyncManager`]: the push and pull pipelines (delta-set and
//!   auto-pagination included)
//! - [`QueryCache`]: delta-set high-water marks per `(collection, query)`
//!
//! Pull selection rules: an unbounded query with `use_delta_set` and a
//! previously cached server timestamp issues a delta-set request;
//! `auto_pagination` fans an unbounded pull out over count-derived pages;
//! everything else is a single fetch. Bounded (`skip`/`limit`) queries
//! never use delta-set and never delete cache entries outside their
//! window.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod keyed_queue;
mod offline;
mod options;
mod processor;
mod query_cache;
mod read_stream;
mod store;
mod sync_manager;
mod sync_state;

pub use client::{Client, ClientConfig};
pub use error::{StoreError, StoreResult};
pub use keyed_queue::KeyedQueue;
pub use offline::OfflineRepository;
pub use options::{
    validate_tag, CollectionRef, PendingSyncPolicy, PullOptions, StoreMode, StoreOptions,
    SyncLimits,
};
pub use processor::{CacheProcessor, DataProcessor, NetworkProcessor, SyncProcessor};
pub use query_cache::{CachedQuery, QueryCache, QUERY_CACHE_COLLECTION};
pub use read_stream::ReadStream;
pub use store::DataStore;
pub use sync_manager::{PushResult, SyncManager, SyncOutcome};
pub use sync_state::{
    PendingOperation, SyncItem, SyncItemState, SyncStateManager, SYNC_COLLECTION,
};

pub use tidemark_model::{
    mint_id, Aggregation, Entity, Filter, JsonObject, ModelError, Query, Reduce, SortOrder,
};
pub use tidemark_net::{ActiveUser, AuthScheme, HttpClient, NetError};
pub use tidemark_persist::{KeyValuePersister, MemoryPersister, PersistError};
