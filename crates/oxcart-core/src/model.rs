//! Domain types for orchestration instances and transfer tasks.
//!
//! # Design
//! - Pure data carriers shared by the engine, checkpoint log, and API.
//! - Wire names are camelCase so the HTTP surface can serialise these types
//!   directly.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Input that starts one orchestration instance. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveRequest {
    /// Root of the directory tree to archive.
    pub root_path: PathBuf,
}

/// One regular file discovered by the tree walker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Absolute path of the discovered file.
    pub path: PathBuf,
}

/// One transfer task planned from a discovered file. The task set for an
/// instance is fixed once the walk completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    /// Unique identifier for the task.
    pub task_id: Uuid,
    /// File this task transfers.
    pub file: FileRecord,
    /// Position in discovery order; fixes the `per_file` ordering.
    pub index: usize,
}

/// Immutable terminal outcome of one transfer task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    /// Task this result belongs to.
    pub task_id: Uuid,
    /// Bytes confirmed transferred; zero when the transfer never started.
    pub bytes_transferred: i64,
    /// Wall-clock duration of the transfer attempt in milliseconds.
    pub duration_millis: i64,
    /// Failure description; `None` marks a succeeded task.
    pub error_message: Option<String>,
}

impl TransferResult {
    /// Whether the task reached the Succeeded terminal state.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

/// Lifecycle states of an orchestration instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Tasks are being dispatched or awaited.
    Running,
    /// All tasks terminal; at least one succeeded or there was nothing to do.
    Completed,
    /// Every task failed, or an unrecoverable engine error occurred.
    Failed,
    /// Cancellation was observed; in-flight outcomes are still recorded.
    Cancelled,
}

impl InstanceStatus {
    /// Whether no further transition can occur from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Render the status as its lowercase string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown instance status '{other}'")),
        }
    }
}

/// Aggregate of all terminal task outcomes for one instance, in dispatch order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    /// Number of terminal outcomes folded into this aggregate.
    pub file_count: usize,
    /// Sum of bytes transferred across all outcomes.
    pub total_bytes: i64,
    /// Sum of transfer durations across all outcomes, in milliseconds.
    pub total_duration_millis: i64,
    /// Per-task outcomes in dispatch order.
    pub per_file: Vec<TransferResult>,
}

/// One tracked run of the bulk-copy workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationInstance {
    /// Unique identifier assigned when the request was accepted.
    pub instance_id: Uuid,
    /// Request that started the instance.
    pub request: ArchiveRequest,
    /// Current lifecycle state.
    pub status: InstanceStatus,
    /// When the request was accepted.
    pub started_at: DateTime<Utc>,
    /// When the instance reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Aggregate result; present if and only if `status` is terminal.
    pub summary: Option<AggregateResult>,
}

/// Filter options for bulk instance queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    /// Keep only instances in this status.
    pub status: Option<InstanceStatus>,
    /// Keep only instances started strictly after this time.
    pub started_after: Option<DateTime<Utc>>,
    /// Keep only instances started strictly before this time.
    pub started_before: Option<DateTime<Utc>>,
}

impl InstanceFilter {
    /// Whether the given instance passes every populated filter field.
    #[must_use]
    pub fn matches(&self, instance: &OrchestrationInstance) -> bool {
        if self.status.is_some_and(|status| status != instance.status) {
            return false;
        }
        if self
            .started_after
            .is_some_and(|after| instance.started_at <= after)
        {
            return false;
        }
        if self
            .started_before
            .is_some_and(|before| instance.started_at >= before)
        {
            return false;
        }
        true
    }
}
