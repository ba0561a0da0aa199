//! # Tidemark Net
//!
//! The authenticated request layer and the typed network repository.
//!
//! This crate provides:
//! - [`HttpClient`]: the transport abstraction (plus [`MockClient`] for tests)
//! - [`AuthScheme`] / [`AppCredentials`]: credential rendering
//! - [`ActiveUserStore`]: the persisted session and its expiry observers
//! - [`RequestExecutor`]: headers, timeouts, error mapping and the
//!   single-flight token refresh on 401
//! - [`NetworkRepository`]: the typed facade over the backend's data API

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod error;
mod http;
mod repo;
mod request;
mod session;

pub use auth::{AppCredentials, AuthScheme};
pub use error::{NetError, NetResult};
pub use http::{headers, HttpClient, Method, MockClient, Request, Response};
pub use repo::{DeltaSetPage, Fetched, NetworkRepository};
pub use request::{ApiRequest, NetConfig, RequestExecutor, MAX_CUSTOM_PROPERTIES_BYTES};
pub use session::{ActiveUser, ActiveUserStore, ACTIVE_USER_SLOT};
