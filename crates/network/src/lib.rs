//! Network side of the transfer engine.
//!
//! The pipelines talk to the storage node through [`StorageClient`], which
//! builds signed request envelopes and sends them over a
//! [`NetworkMiddleware`]. [`HttpNetwork`] is the `reqwest` implementation;
//! tests substitute in-memory nodes.

pub mod client;
pub mod envelope;
pub mod error;
pub mod http;
pub mod middleware;

pub use client::StorageClient;
pub use envelope::{SignedEnvelope, signed_form, verify_envelope};
pub use error::NetworkError;
pub use http::HttpNetwork;
pub use middleware::{FormData, FormPart, NetworkFuture, NetworkMiddleware, NetworkResponse};
