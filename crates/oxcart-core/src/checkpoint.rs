//! Durable append-only checkpoint log, one file per orchestration instance.
//!
//! Each record is a single JSON line appended and synced before the engine
//! treats the transition as done. Replaying a log from the top reconstructs
//! the instance: the fixed work set, every terminal task outcome, and the
//! final status. The log is the single source of truth for resume-after-
//! restart; the engine re-derives decisions from it, never results.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::error::{CoreError, CoreResult};
use crate::model::{
    AggregateResult, ArchiveRequest, InstanceStatus, OrchestrationInstance, PlannedTask,
    TransferResult,
};

const LOG_SUFFIX: &str = ".ckpt";

/// One durable record in an instance's checkpoint log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum CheckpointRecord {
    /// The request was accepted and an instance id assigned.
    InstanceStarted {
        /// Request that started the instance.
        request: ArchiveRequest,
        /// Acceptance timestamp.
        started_at: DateTime<Utc>,
    },
    /// The walk completed and the work set is fixed. Written as one record so
    /// a crash mid-planning never leaves a partial work set behind.
    PlanRecorded {
        /// The fixed work set, in discovery order.
        tasks: Vec<PlannedTask>,
    },
    /// A transfer task reached a terminal state.
    TaskTerminal {
        /// The task's immutable outcome.
        result: TransferResult,
    },
    /// The instance reached a terminal state.
    InstanceFinished {
        /// Terminal status of the instance.
        status: InstanceStatus,
        /// When the terminal state was reached.
        finished_at: DateTime<Utc>,
    },
}

/// Fully replayed view of one instance's checkpoint log.
#[derive(Debug, Clone)]
pub struct InstanceReplay {
    /// Instance the log belongs to.
    pub instance_id: Uuid,
    /// Request recorded at acceptance.
    pub request: ArchiveRequest,
    /// Acceptance timestamp.
    pub started_at: DateTime<Utc>,
    /// Fixed work set, absent when the process died before the walk finished.
    pub plan: Option<Vec<PlannedTask>>,
    /// Terminal outcomes keyed by task id; first record wins on duplicates.
    pub terminal: HashMap<Uuid, TransferResult>,
    /// Terminal instance record, absent for an interrupted run.
    pub finished: Option<(InstanceStatus, DateTime<Utc>)>,
}

impl InstanceReplay {
    /// Whether the instance already reached a terminal state.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Aggregate the recorded outcomes in plan order.
    #[must_use]
    pub fn partial_aggregate(&self) -> AggregateResult {
        let ordered: Vec<TransferResult> = self.plan.as_deref().map_or_else(Vec::new, |plan| {
            plan.iter()
                .filter_map(|task| self.terminal.get(&task.task_id).cloned())
                .collect()
        });
        aggregate(&ordered)
    }

    /// Materialise the catalog view of this instance.
    #[must_use]
    pub fn to_instance(&self) -> OrchestrationInstance {
        let (status, completed_at, summary) = self.finished.map_or(
            (InstanceStatus::Running, None, None),
            |(status, finished_at)| (status, Some(finished_at), Some(self.partial_aggregate())),
        );
        OrchestrationInstance {
            instance_id: self.instance_id,
            request: self.request.clone(),
            status,
            started_at: self.started_at,
            completed_at,
            summary,
        }
    }
}

/// Result of replaying one on-disk log.
#[derive(Debug, Clone)]
pub enum LoadedInstance {
    /// The log replayed cleanly.
    Intact(InstanceReplay),
    /// The log contains an unreadable record; the instance must be failed.
    Corrupt {
        /// Instance whose log failed to replay.
        instance_id: Uuid,
        /// Description of the offending record.
        detail: String,
    },
}

/// Append-only checkpoint store rooted at a state directory.
#[derive(Debug, Clone)]
pub struct CheckpointLog {
    state_dir: PathBuf,
}

impl CheckpointLog {
    /// Open (and create if needed) the checkpoint state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(state_dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir).map_err(|source| CoreError::Io {
            operation: "checkpoint.create_state_dir",
            path: state_dir.clone(),
            source,
        })?;
        Ok(Self { state_dir })
    }

    /// Directory this log writes under.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Record acceptance of a request.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be made durable.
    pub fn record_started(
        &self,
        instance_id: Uuid,
        request: &ArchiveRequest,
        started_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.append(
            instance_id,
            &CheckpointRecord::InstanceStarted {
                request: request.clone(),
                started_at,
            },
        )
    }

    /// Record the fixed work set produced by the walk.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be made durable.
    pub fn record_plan(&self, instance_id: Uuid, tasks: &[PlannedTask]) -> CoreResult<()> {
        self.append(
            instance_id,
            &CheckpointRecord::PlanRecorded {
                tasks: tasks.to_vec(),
            },
        )
    }

    /// Durably record a task's terminal outcome. The dispatcher must not
    /// count the task toward fan-in until this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be made durable.
    pub fn record_terminal(&self, instance_id: Uuid, result: &TransferResult) -> CoreResult<()> {
        self.append(
            instance_id,
            &CheckpointRecord::TaskTerminal {
                result: result.clone(),
            },
        )
    }

    /// Record the instance's terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error if the append cannot be made durable.
    pub fn record_finished(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
        finished_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.append(
            instance_id,
            &CheckpointRecord::InstanceFinished {
                status,
                finished_at,
            },
        )
    }

    /// Whether a terminal outcome is recorded for the given task.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is corrupt.
    pub fn has_terminal(&self, instance_id: Uuid, task_id: Uuid) -> CoreResult<bool> {
        Ok(self
            .terminal_results(instance_id)?
            .contains_key(&task_id))
    }

    /// All recorded terminal outcomes for an instance, first record winning.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is corrupt.
    pub fn terminal_results(
        &self,
        instance_id: Uuid,
    ) -> CoreResult<HashMap<Uuid, TransferResult>> {
        match self.load_instance(instance_id)? {
            None => Ok(HashMap::new()),
            Some(LoadedInstance::Intact(replay)) => Ok(replay.terminal),
            Some(LoadedInstance::Corrupt { instance_id, detail }) => {
                Err(CoreError::CorruptCheckpoint {
                    instance_id,
                    detail,
                })
            }
        }
    }

    /// Replay a single instance's log, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the log file cannot be read.
    pub fn load_instance(&self, instance_id: Uuid) -> CoreResult<Option<LoadedInstance>> {
        let path = self.log_path(instance_id);
        if !path.exists() {
            return Ok(None);
        }
        self.replay_file(instance_id, &path).map(Some)
    }

    /// Replay every log in the state directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be scanned or a log
    /// file cannot be read.
    pub fn load_instances(&self) -> CoreResult<Vec<LoadedInstance>> {
        let entries = fs::read_dir(&self.state_dir).map_err(|source| CoreError::Io {
            operation: "checkpoint.scan_state_dir",
            path: self.state_dir.clone(),
            source,
        })?;

        let mut loaded = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CoreError::Io {
                operation: "checkpoint.scan_state_dir",
                path: self.state_dir.clone(),
                source,
            })?;
            let path = entry.path();
            let Some(instance_id) = instance_id_from_path(&path) else {
                continue;
            };
            loaded.push(self.replay_file(instance_id, &path)?);
        }
        Ok(loaded)
    }

    fn log_path(&self, instance_id: Uuid) -> PathBuf {
        self.state_dir.join(format!("{instance_id}{LOG_SUFFIX}"))
    }

    fn append(&self, instance_id: Uuid, record: &CheckpointRecord) -> CoreResult<()> {
        let path = self.log_path(instance_id);
        let mut line = serde_json::to_string(record).map_err(|source| CoreError::Json {
            operation: "checkpoint.encode_record",
            path: path.clone(),
            source,
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CoreError::Io {
                operation: "checkpoint.open_log",
                path: path.clone(),
                source,
            })?;
        file.write_all(line.as_bytes())
            .map_err(|source| CoreError::Io {
                operation: "checkpoint.append_record",
                path: path.clone(),
                source,
            })?;
        file.sync_data().map_err(|source| CoreError::Io {
            operation: "checkpoint.sync_log",
            path,
            source,
        })
    }

    fn replay_file(&self, instance_id: Uuid, path: &Path) -> CoreResult<LoadedInstance> {
        let text = fs::read_to_string(path).map_err(|source| CoreError::Io {
            operation: "checkpoint.read_log",
            path: path.to_path_buf(),
            source,
        })?;

        let lines: Vec<&str> = text.lines().collect();
        let mut request: Option<(ArchiveRequest, DateTime<Utc>)> = None;
        let mut plan: Option<Vec<PlannedTask>> = None;
        let mut terminal: HashMap<Uuid, TransferResult> = HashMap::new();
        let mut finished: Option<(InstanceStatus, DateTime<Utc>)> = None;

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = match serde_json::from_str::<CheckpointRecord>(line) {
                Ok(record) => record,
                Err(err) if index + 1 == lines.len() => {
                    // torn tail from an interrupted append; the record never
                    // became durable, so the replay simply ends here
                    warn!(
                        instance_id = %instance_id,
                        line = index + 1,
                        error = %err,
                        "ignoring torn trailing checkpoint record"
                    );
                    break;
                }
                Err(err) => {
                    return Ok(LoadedInstance::Corrupt {
                        instance_id,
                        detail: format!("line {}: {err}", index + 1),
                    });
                }
            };

            match record {
                CheckpointRecord::InstanceStarted {
                    request: recorded,
                    started_at,
                } => {
                    request.get_or_insert((recorded, started_at));
                }
                CheckpointRecord::PlanRecorded { tasks } => {
                    plan.get_or_insert(tasks);
                }
                CheckpointRecord::TaskTerminal { result } => {
                    terminal.entry(result.task_id).or_insert(result);
                }
                CheckpointRecord::InstanceFinished {
                    status,
                    finished_at,
                } => {
                    finished.get_or_insert((status, finished_at));
                }
            }
        }

        let Some((request, started_at)) = request else {
            return Ok(LoadedInstance::Corrupt {
                instance_id,
                detail: "missing instance_started record".to_string(),
            });
        };

        Ok(LoadedInstance::Intact(InstanceReplay {
            instance_id,
            request,
            started_at,
            plan,
            terminal,
            finished,
        }))
    }
}

fn instance_id_from_path(path: &Path) -> Option<Uuid> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(LOG_SUFFIX)?;
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileRecord;
    use anyhow::Result;
    use tempfile::TempDir;

    fn request() -> ArchiveRequest {
        ArchiveRequest {
            root_path: PathBuf::from("/data/photos"),
        }
    }

    fn planned(index: usize) -> PlannedTask {
        PlannedTask {
            task_id: Uuid::new_v4(),
            file: FileRecord {
                path: PathBuf::from(format!("/data/photos/{index}.jpg")),
            },
            index,
        }
    }

    fn terminal_for(task: &PlannedTask, bytes: i64) -> TransferResult {
        TransferResult {
            task_id: task.task_id,
            bytes_transferred: bytes,
            duration_millis: 7,
            error_message: None,
        }
    }

    #[test]
    fn replay_round_trips_a_complete_instance() -> Result<()> {
        let temp = TempDir::new()?;
        let log = CheckpointLog::new(temp.path())?;
        let instance_id = Uuid::new_v4();
        let started_at = Utc::now();
        let tasks = vec![planned(0), planned(1)];

        log.record_started(instance_id, &request(), started_at)?;
        log.record_plan(instance_id, &tasks)?;
        log.record_terminal(instance_id, &terminal_for(&tasks[0], 100))?;
        log.record_terminal(instance_id, &terminal_for(&tasks[1], 200))?;
        log.record_finished(instance_id, InstanceStatus::Completed, Utc::now())?;

        let loaded = log
            .load_instance(instance_id)?
            .expect("log should exist on disk");
        let LoadedInstance::Intact(replay) = loaded else {
            panic!("expected an intact replay");
        };
        assert_eq!(replay.request, request());
        assert_eq!(replay.plan.as_deref(), Some(tasks.as_slice()));
        assert_eq!(replay.terminal.len(), 2);
        assert!(replay.is_finished());

        let instance = replay.to_instance();
        assert_eq!(instance.status, InstanceStatus::Completed);
        let summary = instance.summary.expect("terminal instance carries summary");
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.total_bytes, 300);
        Ok(())
    }

    #[test]
    fn duplicate_terminal_records_keep_the_first_outcome() -> Result<()> {
        let temp = TempDir::new()?;
        let log = CheckpointLog::new(temp.path())?;
        let instance_id = Uuid::new_v4();
        let task = planned(0);

        log.record_started(instance_id, &request(), Utc::now())?;
        log.record_plan(instance_id, std::slice::from_ref(&task))?;
        log.record_terminal(instance_id, &terminal_for(&task, 100))?;
        log.record_terminal(instance_id, &terminal_for(&task, 999))?;

        let results = log.terminal_results(instance_id)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[&task.task_id].bytes_transferred, 100);
        assert!(log.has_terminal(instance_id, task.task_id)?);
        Ok(())
    }

    #[test]
    fn torn_trailing_record_is_ignored() -> Result<()> {
        let temp = TempDir::new()?;
        let log = CheckpointLog::new(temp.path())?;
        let instance_id = Uuid::new_v4();
        let task = planned(0);

        log.record_started(instance_id, &request(), Utc::now())?;
        log.record_terminal(instance_id, &terminal_for(&task, 42))?;

        let path = temp.path().join(format!("{instance_id}{LOG_SUFFIX}"));
        let mut contents = fs::read_to_string(&path)?;
        contents.push_str("{\"type\":\"task_terminal\",\"result\":{\"taskId\"");
        fs::write(&path, contents)?;

        let results = log.terminal_results(instance_id)?;
        assert_eq!(results.len(), 1);
        Ok(())
    }

    #[test]
    fn corrupt_interior_record_fails_only_that_instance() -> Result<()> {
        let temp = TempDir::new()?;
        let log = CheckpointLog::new(temp.path())?;
        let bad_id = Uuid::new_v4();
        let good_id = Uuid::new_v4();

        log.record_started(bad_id, &request(), Utc::now())?;
        let bad_path = temp.path().join(format!("{bad_id}{LOG_SUFFIX}"));
        let mut contents = fs::read_to_string(&bad_path)?;
        contents.push_str("not-json-at-all\n");
        contents.push_str(
            &(serde_json::to_string(&CheckpointRecord::InstanceFinished {
                status: InstanceStatus::Completed,
                finished_at: Utc::now(),
            })? + "\n"),
        );
        fs::write(&bad_path, contents)?;

        log.record_started(good_id, &request(), Utc::now())?;

        let loaded = log.load_instances()?;
        assert_eq!(loaded.len(), 2);
        let corrupt = loaded
            .iter()
            .find(|l| matches!(l, LoadedInstance::Corrupt { instance_id, .. } if *instance_id == bad_id));
        assert!(corrupt.is_some(), "bad log should replay as corrupt");
        let intact = loaded
            .iter()
            .find(|l| matches!(l, LoadedInstance::Intact(replay) if replay.instance_id == good_id));
        assert!(intact.is_some(), "sibling log should replay cleanly");
        Ok(())
    }

    #[test]
    fn unfinished_replay_materialises_as_running_without_summary() -> Result<()> {
        let temp = TempDir::new()?;
        let log = CheckpointLog::new(temp.path())?;
        let instance_id = Uuid::new_v4();

        log.record_started(instance_id, &request(), Utc::now())?;
        let Some(LoadedInstance::Intact(replay)) = log.load_instance(instance_id)? else {
            panic!("expected an intact replay");
        };
        let instance = replay.to_instance();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert!(instance.summary.is_none());
        assert!(instance.completed_at.is_none());
        Ok(())
    }
}
