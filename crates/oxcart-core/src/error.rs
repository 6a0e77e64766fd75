//! Error types for the orchestration core.
//!
//! # Design
//!
//! - Constant, structured error messages with context carried in fields.
//! - Per-file transfer failures are data (`TransferResult::error_message`),
//!   never variants here; this enum covers engine-level failures only.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Result alias for orchestration core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Engine-level errors for the orchestration core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO failures while interacting with the checkpoint state directory.
    #[error("checkpoint io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// JSON serialisation failures for checkpoint records.
    #[error("checkpoint json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// A checkpoint log replay hit an unreadable record.
    #[error("corrupt checkpoint log")]
    CorruptCheckpoint {
        /// Instance whose log failed to replay.
        instance_id: Uuid,
        /// Description of the offending record.
        detail: String,
    },
    /// The requested orchestration instance is not known to the catalog.
    #[error("unknown orchestration instance")]
    UnknownInstance {
        /// Instance identifier supplied by the caller.
        instance_id: Uuid,
    },
    /// The archive request failed validation before dispatch.
    #[error("invalid archive request")]
    InvalidRequest {
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// A spawned transfer worker could not be joined.
    #[error("transfer worker join failed")]
    Join {
        /// Operation that was awaiting the worker.
        operation: &'static str,
        /// Description of the join failure.
        detail: String,
    },
}
