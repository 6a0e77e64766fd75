#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! HTTP surface for the orchestration engine.
//!
//! Exposes the polling contract: submit a request, receive an instance id and
//! a status query URI, poll until the instance is terminal. Per-file transfer
//! failures are payload data, never HTTP errors.

mod error;
mod http;
/// Shared HTTP DTOs for the public API.
pub mod models;
mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
