//! # Design
//!
//! - Single crate-level error type for API server bind/serve failures.
//! - Constant messages; operational context in structured fields.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for API server operations.
pub type ApiServerResult<T> = Result<T, ApiServerError>;

/// Errors raised while bootstrapping or serving the API.
#[derive(Debug, Error)]
pub enum ApiServerError {
    /// Binding the API listener failed.
    #[error("failed to bind api listener")]
    Bind {
        /// Address attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Serving the API failed.
    #[error("api server terminated unexpectedly")]
    Serve {
        /// Underlying IO error.
        source: io::Error,
    },
}
