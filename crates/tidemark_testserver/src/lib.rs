//! # Tidemark Test Server
//!
//! A stateful in-process backend implementing the wire semantics the
//! store core speaks: collection CRUD, `_count`, `_group`, `_deltaset`,
//! the OAuth token endpoint and the social login. It plugs straight into
//! the request layer as a [`tidemark_net::HttpClient`], so integration
//! tests drive the real client code paths with no sockets involved.
//!
//! Beyond plain serving, the server offers the fault injection the
//! interesting tests need: expiring session tokens (to exercise the
//! refresh flow), failing refreshes, rejecting delta-set `since` tokens,
//! and disabling delta sync per collection.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod server;
mod state;

pub use server::{LoggedRequest, TestServer};
