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

//! Oxcart application bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (service wiring), `store.rs` (directory-backed
//! object store), `error.rs` (application error type).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application-level error type.
pub mod error;
/// Directory-backed object store implementation.
pub mod store;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use store::DirObjectStore;
