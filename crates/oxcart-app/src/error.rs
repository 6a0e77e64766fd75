//! # Design
//!
//! - Centralize application-level errors for bootstrap and serving.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading or validation failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: oxcart_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: oxcart_telemetry::TelemetryError,
    },
    /// Orchestration core operations failed.
    #[error("orchestration core operation failed")]
    Core {
        /// Operation identifier.
        operation: &'static str,
        /// Source core error.
        source: oxcart_core::CoreError,
    },
    /// Object store operations failed.
    #[error("object store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: oxcart_core::StoreError,
    },
    /// API server operations failed.
    #[error("api server operation failed")]
    ApiServer {
        /// Operation identifier.
        operation: &'static str,
        /// Source API server error.
        source: oxcart_api::ApiServerError,
    },
}
