//! # Tidemark Persist
//!
//! Key/value persistence abstraction for Tidemark's local state.
//!
//! This crate provides:
//! - The [`KeyValuePersister`] trait implemented by platform backends
//! - An in-memory persister for tests and ephemeral caches
//! - Persister error types

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod persister;

pub use error::{PersistError, PersistResult};
pub use memory::MemoryPersister;
pub use persister::KeyValuePersister;
