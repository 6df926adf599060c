//! Error taxonomy for the orchestrator, following `spec.md` §7.
//!
//! Each component gets its own [`thiserror::Error`] enum rather than a single
//! flat error type, mirroring the kernel's per-module error style: callers
//! that only care about one component's failures don't have to match on
//! variants that can never occur for them.

use crate::types::TaskId;

/// Failures from the Task Journal (C1).
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The underlying database call failed.
    #[error("journal database error: {0}")]
    Database(String),
    /// A row's `payload` or `status` column could not be decoded.
    #[error("journal serialization error: {0}")]
    Serialization(String),
    /// No row exists for the given id.
    #[error("task not found: {0}")]
    NotFound(TaskId),
}

impl From<sqlx::Error> for JournalError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failures from the Queue Store (C2).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The underlying Redis call failed.
    #[error("queue store error: {0}")]
    Store(String),
    /// An envelope in a queue list could not be decoded as JSON.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        Self::MalformedEnvelope(e.to_string())
    }
}

/// Failures surfaced by a handler's `process` call (§7 `HandlerError`).
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A required payload field was missing or of the wrong type.
    #[error("invalid handler input: {0}")]
    InvalidInput(String),
    /// The handler's external collaborator (graph engine, etc.) failed.
    #[error("handler execution failed: {0}")]
    Execution(String),
}

/// Configuration failures: fatal to the caller, nothing is enqueued or run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable or config key was absent or invalid.
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Failures surfaced by the Producer API and Control Operations (C3, C7).
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// See [`JournalError`].
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// See [`QueueError`].
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// No handler is registered for the requested `task_type`.
    #[error("no handler registered for kind: {0}")]
    UnknownKind(String),
    /// The requested control operation is not valid from the task's current
    /// status (e.g. `retry` on a COMPLETED task).
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
}
