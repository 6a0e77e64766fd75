//! Bounded parallel fan-out of transfer tasks and ordered fan-in.
//!
//! # Design
//! - A semaphore caps in-flight transfers; every dispatched task waits for a
//!   permit before touching the store.
//! - A task's terminal outcome is appended to the checkpoint log before it
//!   counts toward fan-in, so a crash between upload and record replays as
//!   "not done" and the task runs again on resume.
//! - Tasks already terminal in the log are never re-uploaded; their recorded
//!   outcome feeds the aggregate instead.
//! - `per_file` ordering follows the plan's dispatch order regardless of
//!   completion order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::checkpoint::CheckpointLog;
use crate::error::{CoreError, CoreResult};
use crate::model::{AggregateResult, PlannedTask, TransferResult};
use crate::store::ObjectStore;
use oxcart_telemetry::Metrics;

/// Cooperative cancellation flag shared between the engine and a running
/// dispatch. Setting it stops new transfers from starting; in-flight
/// transfers run to completion and are still recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs one instance's fixed work set against the object store.
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    checkpoints: CheckpointLog,
    max_parallel: usize,
    metrics: Metrics,
}

impl Dispatcher {
    /// Build a dispatcher over the given store and checkpoint log.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        checkpoints: CheckpointLog,
        max_parallel: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            checkpoints,
            max_parallel: max_parallel.max(1),
            metrics,
        }
    }

    /// Fan out the planned tasks, wait for all of them, and fold every
    /// recorded outcome into dispatch order.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint log cannot be read or written, or
    /// if a worker task panics.
    pub async fn dispatch(
        &self,
        instance_id: Uuid,
        plan: &[PlannedTask],
        cancel: &CancelFlag,
    ) -> CoreResult<AggregateResult> {
        let already_terminal = self.checkpoints.terminal_results(instance_id)?;
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut workers: JoinSet<CoreResult<()>> = JoinSet::new();

        for task in plan {
            if already_terminal.contains_key(&task.task_id) {
                debug!(
                    instance_id = %instance_id,
                    task_id = %task.task_id,
                    "skipping task already terminal in checkpoint log"
                );
                continue;
            }
            if cancel.is_set() {
                break;
            }

            let task = task.clone();
            let store = Arc::clone(&self.store);
            let checkpoints = self.checkpoints.clone();
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let metrics = self.metrics.clone();
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    // the semaphore is never closed while workers run
                    return Ok(());
                };
                if cancel.is_set() {
                    return Ok(());
                }

                let result = transfer_one(store.as_ref(), &task).await;
                checkpoints.record_terminal(instance_id, &result)?;
                let status = if result.is_success() {
                    "succeeded"
                } else {
                    "failed"
                };
                metrics.inc_transfer(status, u64::try_from(result.bytes_transferred).unwrap_or(0));
                Ok(())
            });
        }

        while let Some(joined) = workers.join_next().await {
            joined.map_err(|err| CoreError::Join {
                operation: "dispatcher.join_worker",
                detail: err.to_string(),
            })??;
        }

        // re-read so outcomes from this dispatch and from earlier interrupted
        // runs fold together, ordered by the plan
        let recorded = self.checkpoints.terminal_results(instance_id)?;
        let ordered: Vec<TransferResult> = plan
            .iter()
            .filter_map(|task| recorded.get(&task.task_id).cloned())
            .collect();
        if ordered.len() < plan.len() {
            warn!(
                instance_id = %instance_id,
                planned = plan.len(),
                terminal = ordered.len(),
                "dispatch finished with unfinished tasks after cancellation"
            );
        }
        Ok(aggregate(&ordered))
    }
}

/// Run one transfer attempt and fold any error into a terminal result.
async fn transfer_one(store: &dyn ObjectStore, task: &PlannedTask) -> TransferResult {
    let started = Instant::now();
    match store.upload(&task.file.path).await {
        Ok(receipt) => TransferResult {
            task_id: task.task_id,
            bytes_transferred: receipt.bytes_transferred,
            duration_millis: receipt.duration_millis,
            error_message: None,
        },
        Err(err) => {
            let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
            warn!(
                task_id = %task.task_id,
                path = %task.file.path.display(),
                error = %err,
                "transfer task failed"
            );
            TransferResult {
                task_id: task.task_id,
                bytes_transferred: 0,
                duration_millis: elapsed,
                error_message: Some(render_error_chain(&err)),
            }
        }
    }
}

fn render_error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;
    use crate::store::{StoreError, StoreResult, UploadReceipt};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Store stub scripted per path: `Ok(bytes)` or a transport failure.
    struct ScriptedStore {
        outcomes: HashMap<PathBuf, Result<i64, String>>,
        uploads: Mutex<Vec<PathBuf>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(outcomes: HashMap<PathBuf, Result<i64, String>>) -> Self {
            Self {
                outcomes,
                uploads: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }
        }

        fn upload_count(&self) -> usize {
            self.uploads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn upload(&self, path: &Path) -> StoreResult<UploadReceipt> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.uploads.lock().unwrap().push(path.to_path_buf());
            match self.outcomes.get(path) {
                Some(Ok(bytes)) => Ok(UploadReceipt {
                    bytes_transferred: *bytes,
                    duration_millis: 10,
                }),
                Some(Err(detail)) => Err(StoreError::Transport {
                    detail: detail.clone(),
                }),
                None => Err(StoreError::Transport {
                    detail: "unscripted path".to_string(),
                }),
            }
        }
    }

    fn plan_for(paths: &[(&str, Result<i64, String>)]) -> (Vec<PlannedTask>, ScriptedStore) {
        let mut outcomes = HashMap::new();
        let mut plan = Vec::new();
        for (index, (path, outcome)) in paths.iter().enumerate() {
            let path = PathBuf::from(path);
            outcomes.insert(path.clone(), outcome.clone());
            plan.push(PlannedTask {
                task_id: Uuid::new_v4(),
                file: FileRecord { path },
                index,
            });
        }
        (plan, ScriptedStore::new(outcomes))
    }

    fn dispatcher(store: ScriptedStore, temp: &TempDir, max_parallel: usize) -> Dispatcher {
        let checkpoints = CheckpointLog::new(temp.path()).expect("state dir");
        Dispatcher::new(
            Arc::new(store),
            checkpoints,
            max_parallel,
            Metrics::new().expect("metrics registry"),
        )
    }

    #[tokio::test]
    async fn outcomes_fold_in_dispatch_order_with_partial_failures() -> Result<()> {
        let temp = TempDir::new()?;
        let (plan, store) = plan_for(&[
            ("/src/a.bin", Ok(100)),
            ("/src/b.bin", Err("connection reset".to_string())),
            ("/src/c.bin", Ok(300)),
        ]);
        let dispatcher = dispatcher(store, &temp, 2);
        let instance_id = Uuid::new_v4();

        let summary = dispatcher
            .dispatch(instance_id, &plan, &CancelFlag::new())
            .await?;

        assert_eq!(summary.file_count, 3);
        assert_eq!(summary.total_bytes, 400);
        let per_task: Vec<Uuid> = summary.per_file.iter().map(|r| r.task_id).collect();
        let planned: Vec<Uuid> = plan.iter().map(|t| t.task_id).collect();
        assert_eq!(per_task, planned);
        assert!(summary.per_file[0].is_success());
        assert!(!summary.per_file[1].is_success());
        assert!(
            summary.per_file[1]
                .error_message
                .as_deref()
                .is_some_and(|msg| msg.contains("connection reset"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn parallelism_never_exceeds_the_configured_bound() -> Result<()> {
        let temp = TempDir::new()?;
        let scripted: Vec<(String, Result<i64, String>)> = (0..12)
            .map(|i| (format!("/src/{i}.bin"), Ok(10)))
            .collect();
        let borrowed: Vec<(&str, Result<i64, String>)> = scripted
            .iter()
            .map(|(p, o)| (p.as_str(), o.clone()))
            .collect();
        let (plan, store) = plan_for(&borrowed);
        let peak_handle = Arc::new(store);
        let checkpoints = CheckpointLog::new(temp.path())?;
        let dispatcher = Dispatcher::new(
            Arc::clone(&peak_handle) as Arc<dyn ObjectStore>,
            checkpoints,
            3,
            Metrics::new()?,
        );

        dispatcher
            .dispatch(Uuid::new_v4(), &plan, &CancelFlag::new())
            .await?;

        assert!(peak_handle.peak_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(peak_handle.upload_count(), 12);
        Ok(())
    }

    #[tokio::test]
    async fn recorded_tasks_are_not_uploaded_again() -> Result<()> {
        let temp = TempDir::new()?;
        let (plan, store) = plan_for(&[("/src/a.bin", Ok(100)), ("/src/b.bin", Ok(200))]);
        let store = Arc::new(store);
        let checkpoints = CheckpointLog::new(temp.path())?;
        let instance_id = Uuid::new_v4();

        // simulate an earlier run that completed the first task and crashed
        checkpoints.record_terminal(
            instance_id,
            &TransferResult {
                task_id: plan[0].task_id,
                bytes_transferred: 100,
                duration_millis: 5,
                error_message: None,
            },
        )?;

        let dispatcher = Dispatcher::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            checkpoints,
            2,
            Metrics::new()?,
        );
        let summary = dispatcher
            .dispatch(instance_id, &plan, &CancelFlag::new())
            .await?;

        assert_eq!(store.upload_count(), 1, "only the unfinished task uploads");
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.total_bytes, 300);
        assert_eq!(summary.per_file[0].task_id, plan[0].task_id);
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_new_dispatch_but_keeps_recorded_outcomes() -> Result<()> {
        let temp = TempDir::new()?;
        let (plan, store) = plan_for(&[("/src/a.bin", Ok(100)), ("/src/b.bin", Ok(200))]);
        let dispatcher = dispatcher(store, &temp, 2);
        let instance_id = Uuid::new_v4();

        let cancel = CancelFlag::new();
        cancel.set();
        let summary = dispatcher.dispatch(instance_id, &plan, &cancel).await?;

        assert_eq!(summary.file_count, 0);
        assert!(summary.per_file.is_empty());
        Ok(())
    }
}
