//! Core task types shared across the journal, queue store, and handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier, assigned at enqueue time.
///
/// Wrapped rather than a bare [`Uuid`] because it crosses process boundaries
/// inside queue envelopes and is easy to confuse with other domain uuids
/// (episode ids, entity ids) if left unwrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random task id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A task's position in its lifecycle.
///
/// Transitions are restricted to: `Pending -> Processing -> {Completed,
/// Failed}`; `Pending|Processing -> Stopped` (control op); `Failed|Stopped ->
/// Pending` (retry). Represented as a closed enum rather than a bare string
/// so the persisted column can never hold a value outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Enqueued, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker; handler is running.
    Processing,
    /// Handler returned success.
    Completed,
    /// Handler returned an error, panicked, or the envelope was invalid.
    Failed,
    /// An operator issued a stop/cancel control operation.
    Stopped,
}

impl TaskStatus {
    /// The string form persisted in the `status` column and compared against
    /// by handwritten SQL predicates.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::errors::JournalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(crate::errors::JournalError::Serialization(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// A durable journal row: the source of truth for a task's lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque unique identifier, assigned at enqueue.
    pub id: TaskId,
    /// The per-group FIFO key. `"global"` is a reserved group for
    /// cross-project maintenance work.
    pub group_id: String,
    /// Matches a registered handler's [`kind`](crate::registry::Handler::kind).
    pub task_type: String,
    /// Current lifecycle position.
    pub status: TaskStatus,
    /// Opaque structured payload passed verbatim to the handler.
    pub payload: serde_json::Value,
    /// Optional correlation back to a domain entity, for status UIs.
    pub entity_id: Option<String>,
    /// Kind of the correlated domain entity.
    pub entity_type: Option<String>,
    /// Task that enqueued this one, if any.
    pub parent_task_id: Option<TaskId>,
    /// Identifier of the process that last claimed the task.
    pub worker_id: Option<String>,
    /// Monotonically increasing; only Recovery and the retry control op
    /// increment it.
    pub retry_count: i32,
    /// Short error description, set on FAILED.
    pub error_message: Option<String>,
    /// Set at creation.
    pub created_at: DateTime<Utc>,
    /// Set once, the first time the task enters PROCESSING.
    pub started_at: Option<DateTime<Utc>>,
    /// Set once, when the task enters COMPLETED or FAILED.
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the task enters STOPPED.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Aggregate counts and latency over a recent window, returned by
/// [`crate::journal::TaskJournal::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStats {
    /// Number of tasks created within the window, per status.
    pub pending: i64,
    /// See [`Self::pending`].
    pub processing: i64,
    /// See [`Self::pending`].
    pub completed: i64,
    /// See [`Self::pending`].
    pub failed: i64,
    /// See [`Self::pending`].
    pub stopped: i64,
    /// Mean seconds between `started_at` and `completed_at` for tasks that
    /// completed within the window. `None` if none completed.
    pub mean_duration_seconds: Option<f64>,
}
