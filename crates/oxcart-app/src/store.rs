//! Directory-backed object store.
//!
//! Mirrors each source file under a target root, preserving the source path
//! relative to the filesystem root. Stands in for a remote blob client while
//! keeping the engine's [`ObjectStore`] seam honest: the upload is a real
//! byte copy with a verifiable receipt.

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use oxcart_core::{ObjectStore, StoreError, StoreResult, UploadReceipt};

/// Object store that copies files beneath a local target root.
#[derive(Debug, Clone)]
pub struct DirObjectStore {
    target_root: PathBuf,
}

impl DirObjectStore {
    /// Create the store, ensuring the target root exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the target root cannot be created.
    pub async fn new(target_root: impl Into<PathBuf>) -> StoreResult<Self> {
        let target_root = target_root.into();
        tokio::fs::create_dir_all(&target_root)
            .await
            .map_err(|source| StoreError::Io {
                operation: "store.create_target_root",
                path: target_root.clone(),
                source,
            })?;
        Ok(Self { target_root })
    }

    /// Where the upload for `path` lands beneath the target root.
    #[must_use]
    pub fn target_for(&self, path: &Path) -> PathBuf {
        let relative: PathBuf = path
            .components()
            .filter(|component| matches!(component, Component::Normal(_)))
            .collect();
        self.target_root.join(relative)
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn upload(&self, path: &Path) -> StoreResult<UploadReceipt> {
        let started = Instant::now();
        let target = self.target_for(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    operation: "store.create_target_dir",
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let copied = tokio::fs::copy(path, &target)
            .await
            .map_err(|source| StoreError::Io {
                operation: "store.copy_file",
                path: path.to_path_buf(),
                source,
            })?;

        Ok(UploadReceipt {
            bytes_transferred: i64::try_from(copied).unwrap_or(i64::MAX),
            duration_millis: i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX),
        })
    }
}
