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

//! Telemetry primitives shared across the Oxcart workspace.
//!
//! This crate centralises logging, metrics, and request tracing helpers so the
//! orchestration core and delivery surfaces can adopt a consistent
//! observability story. Layout: `init.rs` (tracing subscriber + request
//! context), `metrics.rs` (Prometheus registry), `error.rs` (error types).

pub mod error;
pub mod init;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use init::{
    GlobalContextGuard, LogFormat, LoggingConfig, build_sha, current_request_id, init_logging,
    propagate_request_id_layer, set_request_id_layer, with_request_context,
};
pub use metrics::{Metrics, MetricsSnapshot};
