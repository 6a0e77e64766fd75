//! Object store seam consumed by the dispatcher.
//!
//! The concrete client (remote blob service, local directory, test stub) is
//! injected into the engine at construction; the core never reaches for an
//! ambient storage handle.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Result alias for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by an object store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local IO failed while reading the source file.
    #[error("object store io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The transport to the remote store failed.
    #[error("object store transport failure")]
    Transport {
        /// Description of the transport error.
        detail: String,
    },
}

/// Accounting returned by a completed upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Bytes confirmed written to the store.
    pub bytes_transferred: i64,
    /// Wall-clock duration of the upload in milliseconds.
    pub duration_millis: i64,
}

/// Storage collaborator that moves one file's bytes to the remote store.
///
/// Retry and backoff for transient transport failures are the
/// implementation's concern; the orchestration engine treats any error as the
/// task's terminal Failed outcome.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `path` and report the transferred byte count.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the transport fails.
    async fn upload(&self, path: &Path) -> StoreResult<UploadReceipt>;
}
