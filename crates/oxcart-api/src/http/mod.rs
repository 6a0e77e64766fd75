//! HTTP surface modules (router, handlers, middleware).

/// Shared constants and header names.
pub(crate) mod constants;
/// Problem response helpers and error types.
pub(crate) mod errors;
/// Health and diagnostics endpoints.
pub(crate) mod health;
/// Orchestration lifecycle handlers.
pub(crate) mod orchestrations;
/// Router construction and server host.
pub(crate) mod router;
/// Metrics middleware for HTTP requests.
pub(crate) mod telemetry;
