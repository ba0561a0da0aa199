//! # Tidemark Model
//!
//! Entity model and query language for Tidemark.
//!
//! This crate provides:
//! - [`Entity`]: an open JSON object with `_id` / `_kmd` / `_acl` envelopes
//! - [`Filter`]: the comparison/logical filter tree
//! - [`Query`]: filter + sort + projection + skip/limit, with canonical
//!   serialization and an in-memory evaluator
//! - [`Aggregation`]: grouped count/sum/min/max/average with a local
//!   evaluator and the wire body the backend's `_group` endpoint expects

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod aggregation;
mod compare;
mod entity;
mod error;
mod filter;
mod query;

pub use aggregation::{Aggregation, Reduce};
pub use compare::{cmp_values, partial_cmp_values};
pub use entity::{mint_id, Entity, JsonObject, ENTITY_ID_LEN};
pub use error::{ModelError, ModelResult};
pub use filter::Filter;
pub use query::{Query, SortOrder};
