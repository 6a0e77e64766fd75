//! Orchestration engine: accepts requests, drives runs, resumes after restart.
//!
//! # Design
//! - Every lifecycle transition is made durable in the checkpoint log before
//!   the catalog mirrors it, so the catalog can always be rebuilt from disk.
//! - A run is walk, plan, dispatch, aggregate, finish. Per-file failure is
//!   ordinary data; the instance fails only when every task failed or the
//!   engine itself could not make progress.
//! - `resume` re-drives interrupted instances through the same run path;
//!   recorded tasks are skipped by the dispatcher, so a resumed run converges
//!   on the aggregate the uninterrupted run would have produced.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::checkpoint::{CheckpointLog, InstanceReplay, LoadedInstance};
use crate::dispatcher::{CancelFlag, Dispatcher};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    AggregateResult, ArchiveRequest, InstanceFilter, InstanceStatus, OrchestrationInstance,
    PlannedTask,
};
use crate::status::InstanceCatalog;
use crate::store::ObjectStore;
use crate::walker::walk;
use oxcart_telemetry::Metrics;

/// Long-lived orchestrator shared between the HTTP surface and background runs.
pub struct ArchiveEngine {
    checkpoints: CheckpointLog,
    dispatcher: Dispatcher,
    catalog: InstanceCatalog,
    metrics: Metrics,
    cancel_flags: Mutex<HashMap<Uuid, CancelFlag>>,
}

impl ArchiveEngine {
    /// Build an engine over the given store and checkpoint state directory.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        checkpoints: CheckpointLog,
        max_parallel: usize,
        metrics: Metrics,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            store,
            checkpoints.clone(),
            max_parallel,
            metrics.clone(),
        );
        Self {
            checkpoints,
            dispatcher,
            catalog: InstanceCatalog::new(),
            metrics,
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Accept a request, durably record it, and spawn the run in the
    /// background. Returns the catalogued Running instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails validation or the acceptance
    /// record cannot be made durable.
    pub async fn start(
        self: &Arc<Self>,
        request: ArchiveRequest,
    ) -> CoreResult<OrchestrationInstance> {
        validate_request(&request)?;

        let instance_id = Uuid::new_v4();
        let started_at = Utc::now();
        self.checkpoints
            .record_started(instance_id, &request, started_at)?;

        let instance = OrchestrationInstance {
            instance_id,
            request: request.clone(),
            status: InstanceStatus::Running,
            started_at,
            completed_at: None,
            summary: None,
        };
        self.catalog.upsert(instance.clone()).await;
        self.metrics.inc_instance_started();
        let cancel = self.register_cancel_flag(instance_id);

        info!(
            instance_id = %instance_id,
            root_path = %request.root_path.display(),
            "orchestration instance accepted"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(instance_id, request, None, cancel).await;
        });
        Ok(instance)
    }

    /// Request cancellation of a running instance. In-flight transfers run
    /// to completion; no new transfers start.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance is unknown.
    pub async fn cancel(&self, instance_id: Uuid) -> CoreResult<()> {
        let Some(instance) = self.catalog.get(instance_id).await else {
            return Err(CoreError::UnknownInstance { instance_id });
        };
        if instance.status.is_terminal() {
            // terminal instances ignore cancellation; the request is still
            // acknowledged
            return Ok(());
        }
        if let Some(flag) = self
            .cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&instance_id)
        {
            flag.set();
            info!(instance_id = %instance_id, "cancellation requested");
        }
        Ok(())
    }

    /// Look up one instance for the status surface.
    pub async fn instance(&self, instance_id: Uuid) -> Option<OrchestrationInstance> {
        self.catalog.get(instance_id).await
    }

    /// List catalogued instances passing the filter, newest first.
    pub async fn instances(&self, filter: &InstanceFilter) -> Vec<OrchestrationInstance> {
        self.catalog.list(filter).await
    }

    /// Replay every on-disk log, hydrate the catalog, and re-drive
    /// interrupted instances. Returns how many runs were resumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be scanned.
    pub async fn resume(self: &Arc<Self>) -> CoreResult<usize> {
        let loaded = self.checkpoints.load_instances()?;
        let mut resumed = 0_usize;

        for entry in loaded {
            match entry {
                LoadedInstance::Intact(replay) if replay.is_finished() => {
                    self.catalog.upsert(replay.to_instance()).await;
                }
                LoadedInstance::Intact(replay) => {
                    self.resume_one(replay).await;
                    resumed += 1;
                }
                LoadedInstance::Corrupt {
                    instance_id,
                    detail,
                } => {
                    error!(
                        instance_id = %instance_id,
                        detail = %detail,
                        "checkpoint log corrupt; marking instance failed"
                    );
                    self.catalog
                        .upsert(corrupt_placeholder(instance_id))
                        .await;
                }
            }
        }

        if resumed > 0 {
            info!(resumed, "resumed interrupted orchestration instances");
        }
        Ok(resumed)
    }

    async fn resume_one(self: &Arc<Self>, replay: InstanceReplay) {
        let InstanceReplay {
            instance_id,
            request,
            started_at,
            plan,
            ..
        } = replay;

        self.catalog
            .upsert(OrchestrationInstance {
                instance_id,
                request: request.clone(),
                status: InstanceStatus::Running,
                started_at,
                completed_at: None,
                summary: None,
            })
            .await;
        self.metrics.inc_active_instances();
        let cancel = self.register_cancel_flag(instance_id);

        info!(
            instance_id = %instance_id,
            planned = plan.as_ref().map_or(0, Vec::len),
            "resuming interrupted orchestration instance"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run(instance_id, request, plan, cancel).await;
        });
    }

    /// One full run: walk (unless a recorded plan exists), dispatch, finish.
    async fn run(
        self: Arc<Self>,
        instance_id: Uuid,
        request: ArchiveRequest,
        recorded_plan: Option<Vec<PlannedTask>>,
        cancel: CancelFlag,
    ) {
        let outcome = self
            .drive(instance_id, &request, recorded_plan, &cancel)
            .await;

        let (status, summary) = match outcome {
            Ok((status, summary)) => (status, summary),
            Err(err) => {
                error!(
                    instance_id = %instance_id,
                    error = %err,
                    "orchestration run failed"
                );
                // fold whatever did get recorded, in plan order
                let summary = match self.checkpoints.load_instance(instance_id) {
                    Ok(Some(LoadedInstance::Intact(replay))) => replay.partial_aggregate(),
                    _ => AggregateResult::default(),
                };
                (InstanceStatus::Failed, summary)
            }
        };

        let completed_at = Utc::now();
        if let Err(err) = self
            .checkpoints
            .record_finished(instance_id, status, completed_at)
        {
            error!(
                instance_id = %instance_id,
                error = %err,
                "failed to record terminal instance status"
            );
        }
        self.catalog
            .finish(instance_id, status, completed_at, summary)
            .await;
        self.metrics.dec_active_instances();
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&instance_id);
        info!(
            instance_id = %instance_id,
            status = status.as_str(),
            "orchestration instance finished"
        );
    }

    async fn drive(
        &self,
        instance_id: Uuid,
        request: &ArchiveRequest,
        recorded_plan: Option<Vec<PlannedTask>>,
        cancel: &CancelFlag,
    ) -> CoreResult<(InstanceStatus, AggregateResult)> {
        let plan = match recorded_plan {
            Some(plan) => plan,
            None => self.plan(instance_id, &request.root_path).await?,
        };

        let summary = self.dispatcher.dispatch(instance_id, &plan, cancel).await?;
        let status = if cancel.is_set() && summary.file_count < plan.len() {
            InstanceStatus::Cancelled
        } else if !plan.is_empty() && summary.per_file.iter().all(|r| !r.is_success()) {
            InstanceStatus::Failed
        } else {
            InstanceStatus::Completed
        };
        Ok((status, summary))
    }

    /// Walk the root on a blocking thread and durably fix the work set.
    async fn plan(&self, instance_id: Uuid, root: &Path) -> CoreResult<Vec<PlannedTask>> {
        let root = root.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || walk(&root))
            .await
            .map_err(|err| CoreError::Join {
                operation: "engine.walk",
                detail: err.to_string(),
            })?;

        if !outcome.skipped.is_empty() {
            self.metrics
                .inc_walk_subtrees_skipped(outcome.skipped.len() as u64);
            warn!(
                instance_id = %instance_id,
                skipped = outcome.skipped.len(),
                "walk skipped inaccessible subtrees"
            );
        }

        let plan: Vec<PlannedTask> = outcome
            .files
            .into_iter()
            .enumerate()
            .map(|(index, file)| PlannedTask {
                task_id: Uuid::new_v4(),
                file,
                index,
            })
            .collect();
        self.checkpoints.record_plan(instance_id, &plan)?;
        info!(
            instance_id = %instance_id,
            files = plan.len(),
            "work set fixed"
        );
        Ok(plan)
    }

    fn register_cancel_flag(&self, instance_id: Uuid) -> CancelFlag {
        let flag = CancelFlag::new();
        self.cancel_flags
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(instance_id, flag.clone());
        flag
    }
}

fn validate_request(request: &ArchiveRequest) -> CoreResult<()> {
    if request.root_path.as_os_str().is_empty() {
        return Err(CoreError::InvalidRequest {
            field: "rootPath",
            reason: "must not be empty",
            value: None,
        });
    }
    if !request.root_path.is_absolute() {
        return Err(CoreError::InvalidRequest {
            field: "rootPath",
            reason: "must be an absolute path",
            value: Some(request.root_path.display().to_string()),
        });
    }
    if !request.root_path.is_dir() {
        return Err(CoreError::InvalidRequest {
            field: "rootPath",
            reason: "must name an existing directory",
            value: Some(request.root_path.display().to_string()),
        });
    }
    Ok(())
}

fn corrupt_placeholder(instance_id: Uuid) -> OrchestrationInstance {
    let now = Utc::now();
    OrchestrationInstance {
        instance_id,
        request: ArchiveRequest {
            root_path: std::path::PathBuf::new(),
        },
        status: InstanceStatus::Failed,
        started_at: now,
        completed_at: Some(now),
        summary: Some(AggregateResult::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;
    use crate::store::{StoreError, StoreResult, UploadReceipt};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Store stub that reports a file's on-disk length, failing any path
    /// whose name contains "poison".
    struct LengthStore {
        uploads: AtomicUsize,
    }

    impl LengthStore {
        fn new() -> Self {
            Self {
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for LengthStore {
        async fn upload(&self, path: &Path) -> StoreResult<UploadReceipt> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("poison") {
                return Err(StoreError::Transport {
                    detail: "simulated outage".to_string(),
                });
            }
            let len = tokio::fs::metadata(path)
                .await
                .map_err(|source| StoreError::Io {
                    operation: "stub.metadata",
                    path: path.to_path_buf(),
                    source,
                })?
                .len();
            Ok(UploadReceipt {
                bytes_transferred: i64::try_from(len).unwrap_or(i64::MAX),
                duration_millis: 1,
            })
        }
    }

    fn engine_over(state: &TempDir, store: Arc<dyn ObjectStore>) -> Arc<ArchiveEngine> {
        let checkpoints = CheckpointLog::new(state.path()).expect("state dir");
        Arc::new(ArchiveEngine::new(
            store,
            checkpoints,
            4,
            Metrics::new().expect("metrics registry"),
        ))
    }

    async fn poll_terminal(engine: &Arc<ArchiveEngine>, id: Uuid) -> OrchestrationInstance {
        for _ in 0..200 {
            if let Some(instance) = engine.instance(id).await {
                if instance.status.is_terminal() {
                    return instance;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn partial_failure_still_completes_with_per_file_detail() -> Result<()> {
        let state = TempDir::new()?;
        let source = TempDir::new()?;
        std::fs::write(source.path().join("a.bin"), vec![0_u8; 100])?;
        std::fs::write(source.path().join("poison.bin"), vec![0_u8; 50])?;
        std::fs::write(source.path().join("c.bin"), vec![0_u8; 200])?;

        let engine = engine_over(&state, Arc::new(LengthStore::new()));
        let accepted = engine
            .start(ArchiveRequest {
                root_path: source.path().to_path_buf(),
            })
            .await?;
        assert_eq!(accepted.status, InstanceStatus::Running);
        assert!(accepted.summary.is_none());

        let finished = poll_terminal(&engine, accepted.instance_id).await;
        assert_eq!(finished.status, InstanceStatus::Completed);
        let summary = finished.summary.expect("terminal instance has summary");
        assert_eq!(summary.file_count, 3);
        assert_eq!(summary.total_bytes, 300);
        assert_eq!(summary.per_file.iter().filter(|r| !r.is_success()).count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn empty_root_completes_with_empty_summary() -> Result<()> {
        let state = TempDir::new()?;
        let source = TempDir::new()?;
        let engine = engine_over(&state, Arc::new(LengthStore::new()));

        let accepted = engine
            .start(ArchiveRequest {
                root_path: source.path().to_path_buf(),
            })
            .await?;
        let finished = poll_terminal(&engine, accepted.instance_id).await;
        assert_eq!(finished.status, InstanceStatus::Completed);
        assert_eq!(finished.summary.map(|s| s.file_count), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn all_tasks_failing_fails_the_instance() -> Result<()> {
        let state = TempDir::new()?;
        let source = TempDir::new()?;
        std::fs::write(source.path().join("poison-a.bin"), b"x")?;
        std::fs::write(source.path().join("poison-b.bin"), b"y")?;

        let engine = engine_over(&state, Arc::new(LengthStore::new()));
        let accepted = engine
            .start(ArchiveRequest {
                root_path: source.path().to_path_buf(),
            })
            .await?;
        let finished = poll_terminal(&engine, accepted.instance_id).await;
        assert_eq!(finished.status, InstanceStatus::Failed);
        assert_eq!(finished.summary.map(|s| s.file_count), Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_roots_are_rejected_before_dispatch() -> Result<()> {
        let state = TempDir::new()?;
        let engine = engine_over(&state, Arc::new(LengthStore::new()));

        for root in ["", "relative/path", "/definitely/not/a/real/root"] {
            let err = engine
                .start(ArchiveRequest {
                    root_path: PathBuf::from(root),
                })
                .await
                .expect_err("invalid root must be rejected");
            assert!(matches!(err, CoreError::InvalidRequest { field: "rootPath", .. }));
        }
        assert!(engine.instances(&InstanceFilter::default()).await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn resume_skips_recorded_tasks_and_converges() -> Result<()> {
        let state = TempDir::new()?;
        let source = TempDir::new()?;
        std::fs::write(source.path().join("a.bin"), vec![0_u8; 100])?;
        std::fs::write(source.path().join("b.bin"), vec![0_u8; 200])?;

        // script the log of a run that finished one task and then died
        let checkpoints = CheckpointLog::new(state.path())?;
        let instance_id = Uuid::new_v4();
        let request = ArchiveRequest {
            root_path: source.path().to_path_buf(),
        };
        let plan = vec![
            PlannedTask {
                task_id: Uuid::new_v4(),
                file: FileRecord {
                    path: source.path().join("a.bin"),
                },
                index: 0,
            },
            PlannedTask {
                task_id: Uuid::new_v4(),
                file: FileRecord {
                    path: source.path().join("b.bin"),
                },
                index: 1,
            },
        ];
        checkpoints.record_started(instance_id, &request, Utc::now())?;
        checkpoints.record_plan(instance_id, &plan)?;
        checkpoints.record_terminal(
            instance_id,
            &crate::model::TransferResult {
                task_id: plan[0].task_id,
                bytes_transferred: 100,
                duration_millis: 2,
                error_message: None,
            },
        )?;

        let store = Arc::new(LengthStore::new());
        let engine = engine_over(&state, Arc::clone(&store) as Arc<dyn ObjectStore>);
        let resumed = engine.resume().await?;
        assert_eq!(resumed, 1);

        let finished = poll_terminal(&engine, instance_id).await;
        assert_eq!(finished.status, InstanceStatus::Completed);
        let summary = finished.summary.expect("summary");
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.total_bytes, 300);
        assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(summary.per_file[0].task_id, plan[0].task_id);
        Ok(())
    }

    #[tokio::test]
    async fn finished_logs_hydrate_without_rerunning() -> Result<()> {
        let state = TempDir::new()?;
        let checkpoints = CheckpointLog::new(state.path())?;
        let instance_id = Uuid::new_v4();
        checkpoints.record_started(
            instance_id,
            &ArchiveRequest {
                root_path: PathBuf::from("/gone"),
            },
            Utc::now(),
        )?;
        checkpoints.record_plan(instance_id, &[])?;
        checkpoints.record_finished(instance_id, InstanceStatus::Completed, Utc::now())?;

        let store = Arc::new(LengthStore::new());
        let engine = engine_over(&state, Arc::clone(&store) as Arc<dyn ObjectStore>);
        assert_eq!(engine.resume().await?, 0);

        let instance = engine.instance(instance_id).await.expect("hydrated");
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(store.uploads.load(Ordering::SeqCst), 0);
        Ok(())
    }

    /// Store stub that parks every upload until the test opens the gate.
    struct GatedStore {
        entered: tokio::sync::Semaphore,
        gate: tokio::sync::Semaphore,
        uploads: AtomicUsize,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                entered: tokio::sync::Semaphore::new(0),
                gate: tokio::sync::Semaphore::new(0),
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObjectStore for GatedStore {
        async fn upload(&self, _path: &Path) -> StoreResult<UploadReceipt> {
            self.entered.add_permits(1);
            let permit = self.gate.acquire().await.expect("gate never closes");
            permit.forget();
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(UploadReceipt {
                bytes_transferred: 10,
                duration_millis: 1,
            })
        }
    }

    #[tokio::test]
    async fn cancel_mid_run_finishes_cancelled_with_partial_results() -> Result<()> {
        let state = TempDir::new()?;
        let source = TempDir::new()?;
        for name in ["a.bin", "b.bin", "c.bin"] {
            std::fs::write(source.path().join(name), vec![0_u8; 10])?;
        }

        let store = Arc::new(GatedStore::new());
        let checkpoints = CheckpointLog::new(state.path())?;
        let engine = Arc::new(ArchiveEngine::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            checkpoints,
            1,
            Metrics::new()?,
        ));
        let accepted = engine
            .start(ArchiveRequest {
                root_path: source.path().to_path_buf(),
            })
            .await?;

        // wait for the first transfer to be in flight, then cancel; only
        // then does the gate open, so no later transfer can slip through
        store.entered.acquire().await?.forget();
        engine.cancel(accepted.instance_id).await?;
        store.gate.add_permits(3);

        let finished = poll_terminal(&engine, accepted.instance_id).await;
        assert_eq!(finished.status, InstanceStatus::Cancelled);
        let summary = finished.summary.expect("terminal instance has summary");
        assert_eq!(summary.file_count, 1, "the in-flight outcome is retained");
        assert_eq!(summary.total_bytes, 10);
        assert_eq!(store.uploads.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn cancelling_an_unknown_instance_is_an_error() -> Result<()> {
        let state = TempDir::new()?;
        let engine = engine_over(&state, Arc::new(LengthStore::new()));
        let err = engine.cancel(Uuid::new_v4()).await.expect_err("unknown id");
        assert!(matches!(err, CoreError::UnknownInstance { .. }));
        Ok(())
    }
}
