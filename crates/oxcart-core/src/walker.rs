//! Recursive enumeration of regular files under an archive root.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::model::FileRecord;

/// Subtree the walk could not enter, recorded instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedSubtree {
    /// Path of the inaccessible entry.
    pub path: PathBuf,
    /// Description of the traversal error.
    pub detail: String,
}

/// Result of one walk: the discovered work set plus skipped subtrees.
#[derive(Debug, Clone, Default)]
pub struct WalkOutcome {
    /// Regular files in discovery order.
    pub files: Vec<FileRecord>,
    /// Subtrees skipped due to access or lookup errors.
    pub skipped: Vec<SkippedSubtree>,
}

/// Enumerate every reachable regular file under `root`.
///
/// A subtree that fails with a permission or lookup error is logged and
/// skipped; sibling and ancestor subtrees are unaffected. The walk never
/// fails as a whole: a missing or unreadable root simply yields an empty
/// file list with the error recorded in `skipped`.
#[must_use]
pub fn walk(root: &Path) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();
    for entry in WalkDir::new(root) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    outcome.files.push(FileRecord {
                        path: entry.into_path(),
                    });
                }
            }
            Err(err) => {
                let path = err
                    .path()
                    .map_or_else(|| root.to_path_buf(), Path::to_path_buf);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "skipping inaccessible subtree during walk"
                );
                outcome.skipped.push(SkippedSubtree {
                    path,
                    detail: err.to_string(),
                });
            }
        }
    }
    outcome
}
