//! Folding terminal task outcomes into one instance summary.

use crate::model::{AggregateResult, TransferResult};

/// Fold terminal outcomes into an [`AggregateResult`].
///
/// Pure function: `file_count` is the outcome count, totals are plain sums,
/// and `per_file` preserves the input (dispatch) order. Failed outcomes
/// contribute their recorded bytes and duration, which is zero bytes when the
/// transfer never started.
#[must_use]
pub fn aggregate(results: &[TransferResult]) -> AggregateResult {
    AggregateResult {
        file_count: results.len(),
        total_bytes: results.iter().map(|r| r.bytes_transferred).sum(),
        total_duration_millis: results.iter().map(|r| r.duration_millis).sum(),
        per_file: results.to_vec(),
    }
}
