//! Handler Registry (C5): maps a task kind to the [`Handler`] that executes
//! it.
//!
//! Grounded on `examples/original_source/.../tasks/registry.py`'s
//! `TaskRegistry` (a plain `dict[str, TaskHandler]` with `register`/
//! `get_handler`) and, for the Rust shape of a process-local registry behind
//! a lock, on the teacher's `DynamicToolRegistry`
//! (`RwLock<HashMap<String, _>>`, a `Debug` impl that reports only counts).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::HandlerError;
use crate::graph::GraphEngine;
use crate::journal::TaskJournal;
use crate::producer::Producer;
use crate::types::TaskId;

/// Cooperative cancellation signal delivered to a running handler. A
/// handler observes it at its own suspension points (`spec.md` §4.4's
/// "cancellation"); the orchestrator never forcibly aborts a handler.
pub type CancellationSignal = watch::Receiver<bool>;

/// `true` once shutdown has been signaled.
#[must_use]
pub fn is_cancelled(signal: &CancellationSignal) -> bool {
    *signal.borrow()
}

/// Everything a [`Handler::process`] call is granted access to: the graph
/// engine client, the Journal (for child-task emission via [`Producer`]),
/// and the cooperative cancellation signal (`spec.md` §4.4 step d).
pub struct HandlerContext {
    /// The only seam into the graph engine; see [`crate::graph`].
    pub graph: Arc<dyn GraphEngine>,
    /// Read access for handlers that need to inspect other rows (none of
    /// the four in-scope handlers do today, but the contract grants it).
    pub journal: TaskJournal,
    /// Lets a handler enqueue a child task, e.g. incremental-refresh
    /// enqueuing a rebuild-communities task (`spec.md` §4.8.4).
    pub producer: Producer,
    /// Observed at suspension points; does not interrupt in-progress work.
    pub cancellation: CancellationSignal,
    /// The worker process executing this call, for diagnostics.
    pub worker_id: String,
    /// The id of the task being processed, for [`HandlerContext::producer`]
    /// calls that set `parent_task_id`.
    pub task_id: TaskId,
}

/// A registered task kind's behavior.
///
/// `kind()` must be unique within a process; `timeout_seconds()` bounds how
/// long Recovery lets an in-flight invocation run before treating it as
/// dead and re-queuing its envelope (`spec.md` §4.5).
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique task-kind string, matched against
    /// [`crate::types::Task::task_type`] / the envelope's `task_type`.
    fn kind(&self) -> &str;

    /// Wall-clock upper bound for one invocation.
    fn timeout_seconds(&self) -> u64;

    /// Execute the handler's effect. Implementations must be idempotent:
    /// Recovery may cause this to be invoked more than once for the same
    /// payload (`spec.md` §5).
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] on any failure; the orchestrator treats
    /// this identically to a panic (Journal → FAILED, no automatic retry).
    async fn process(
        &self,
        payload: &serde_json::Value,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError>;
}

/// Process-local mapping from task kind to its [`Handler`].
///
/// Registration happens once at worker-process startup, before the Worker
/// Pool begins its loop (`spec.md` §4.5); lookups happen on every claimed
/// envelope and by Recovery on every `processing` scan, hence the `RwLock`
/// rather than a `Mutex`.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or_default();
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &count)
            .finish()
    }
}

impl HandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register `handler` under [`Handler::kind`], replacing any previous
    /// handler registered for that kind.
    pub fn register(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("handler registry lock poisoned")
            .insert(handler.kind().to_owned(), handler);
    }

    /// Look up the handler for `kind`, if any is registered.
    #[must_use]
    pub fn lookup(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .expect("handler registry lock poisoned")
            .get(kind)
            .cloned()
    }

    /// [`Handler::timeout_seconds`] for `kind`, or `fallback` if `kind` is
    /// unregistered. Used by Recovery, which must still age out envelopes
    /// whose kind it no longer recognizes (`spec.md` §4.6 step 2).
    #[must_use]
    pub fn timeout_for(&self, kind: &str, fallback: u64) -> u64 {
        self.lookup(kind)
            .map_or(fallback, |h| h.timeout_seconds())
    }

    /// The longest `timeout_seconds` among every registered handler, or
    /// `fallback` if none are registered or all are shorter than it. Used to
    /// validate `groupLockTtlSeconds` against the handlers actually running
    /// in this process, not just the fallback timeout (`spec.md` §6).
    #[must_use]
    pub fn max_timeout_seconds(&self, fallback: u64) -> u64 {
        let registered_max = self
            .handlers
            .read()
            .expect("handler registry lock poisoned")
            .values()
            .map(|h| h.timeout_seconds())
            .max()
            .unwrap_or(0);
        registered_max.max(fallback)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
