//! Worker Pool (C4): `N` cooperative workers per process, each repeatedly
//! claiming one group, popping one envelope, and running its handler.
//!
//! The seven-step loop of `spec.md` §4.4, one Tokio task per worker.
//! Grounded on the teacher's `heartbeat::run_heartbeat` `tokio::select!`
//! idiom (interval tick + `watch::Receiver<bool>` shutdown) for the
//! loop/shutdown shape, generalized from a single recurring tick to the
//! claim-then-process structure below; the claim order (sample, then try
//! each lock in turn) is grounded on
//! `examples/original_source/.../redis_queue.py`'s `_worker_loop`
//! (`srandmember` candidates, `set(nx=True, ex=...)` lock attempts).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::graph::GraphEngine;
use crate::journal::TaskJournal;
use crate::producer::Producer;
use crate::queue::{Envelope, QueueStore};
use crate::registry::{CancellationSignal, HandlerContext, HandlerRegistry};
use crate::types::{TaskId, TaskStatus};

/// Backoff applied when no active group has work (`spec.md` §4.4 step 1).
const NO_ACTIVE_GROUPS_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff applied when every sampled group's lock is already held
/// (`spec.md` §4.4 step 2).
const LOCK_CONTENTION_BACKOFF: Duration = Duration::from_millis(500);

/// Wiring shared by every worker in a process.
#[derive(Clone)]
pub struct WorkerPoolDeps {
    /// Source of truth for task status.
    pub journal: TaskJournal,
    /// Ephemeral queue, locks, and active-group set.
    pub queue: Arc<dyn QueueStore>,
    /// Maps envelope `task_type` to the handler that runs it.
    pub registry: Arc<HandlerRegistry>,
    /// The only seam into the graph engine.
    pub graph: Arc<dyn GraphEngine>,
    /// Lets a handler enqueue a child task.
    pub producer: Producer,
    /// Number of groups sampled per claim attempt
    /// (`activeGroupsSampleSize`).
    pub sample_size: usize,
    /// Lock TTL, `>=` the longest registered handler timeout
    /// (`groupLockTtlSeconds`).
    pub group_lock_ttl_seconds: u64,
    /// Fallback timeout for an unregistered kind.
    pub default_handler_timeout_seconds: u64,
}

/// Derive a worker id unique enough to diagnose which process/worker last
/// touched a task, mirroring the source's `f"{hostname}-{uuid4().hex[:8]}"`.
#[must_use]
pub fn generate_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("pid{}-{}", std::process::id(), &suffix[..8])
}

/// Run one worker's claim loop until `shutdown_rx` reports `true`.
///
/// On shutdown, the worker finishes its current handler invocation (if any)
/// and then exits; the handler itself is responsible for observing `ctx`'s
/// cancellation signal if it wants to return early (`spec.md` §4.4
/// "Cancellation").
pub async fn run_worker(
    worker_id: String,
    deps: WorkerPoolDeps,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(worker_id, "worker started");

    // The shutdown check happens only between iterations, never while an
    // iteration (which may include a handler invocation) is in flight: the
    // loop must let the current handler run to completion so it releases
    // its group lock on every exit path (spec.md §4.4 step g). A handler
    // that wants to return early on shutdown observes `shutdown_rx` itself
    // through `ctx.cancellation`.
    while !*shutdown_rx.borrow() {
        run_one_iteration(&worker_id, &deps, shutdown_rx.clone()).await;
    }

    info!(worker_id, "worker stopped");
}

async fn run_one_iteration(
    worker_id: &str,
    deps: &WorkerPoolDeps,
    cancellation: CancellationSignal,
) {
    let candidates = match deps.queue.sample_active_groups(deps.sample_size).await {
        Ok(groups) => groups,
        Err(e) => {
            error!(worker_id, error = %e, "failed to sample active groups");
            tokio::time::sleep(NO_ACTIVE_GROUPS_BACKOFF).await;
            return;
        }
    };

    if candidates.is_empty() {
        tokio::time::sleep(NO_ACTIVE_GROUPS_BACKOFF).await;
        return;
    }

    for group_id in candidates {
        match deps
            .queue
            .try_acquire_group_lock(&group_id, worker_id, deps.group_lock_ttl_seconds)
            .await
        {
            Ok(true) => {
                claim_and_process(worker_id, &group_id, deps, cancellation).await;
                return;
            }
            Ok(false) => continue,
            Err(e) => {
                error!(worker_id, group_id, error = %e, "failed to attempt group lock");
            }
        }
    }

    tokio::time::sleep(LOCK_CONTENTION_BACKOFF).await;
}

/// Runs steps 3a-3g of `spec.md` §4.4 for one claimed group lock, releasing
/// the lock on every exit path.
async fn claim_and_process(
    worker_id: &str,
    group_id: &str,
    deps: &WorkerPoolDeps,
    cancellation: CancellationSignal,
) {
    let result = claim_and_process_inner(worker_id, group_id, deps, cancellation).await;
    if let Err(e) = deps.queue.release_group_lock(group_id, worker_id).await {
        error!(worker_id, group_id, error = %e, "failed to release group lock");
    }
    if let Err(e) = result {
        warn!(worker_id, group_id, error = %e, "worker iteration failed");
    }
}

async fn claim_and_process_inner(
    worker_id: &str,
    group_id: &str,
    deps: &WorkerPoolDeps,
    cancellation: CancellationSignal,
) -> Result<(), OrchestratorError> {
    let envelope = match deps.queue.pop_one_to_processing(group_id).await? {
        Some(env) => env,
        None => {
            if deps.queue.is_group_empty(group_id).await? {
                deps.queue.remove_active_group(group_id).await?;
            }
            return Ok(());
        }
    };

    let task_id: TaskId = match envelope.task_id.parse() {
        Ok(id) => id,
        Err(e) => {
            warn!(worker_id, envelope.task_id, error = %e, "malformed task id in envelope, acking without journal update");
            deps.queue.ack_processed(&envelope).await?;
            return Ok(());
        }
    };

    let Some(handler) = deps.registry.lookup(&envelope.task_type) else {
        warn!(worker_id, %task_id, kind = %envelope.task_type, "unknown task kind");
        deps.queue.ack_processed(&envelope).await?;
        mark_failed_best_effort(
            &deps.journal,
            task_id,
            &format!("unknown kind: {}", envelope.task_type),
        )
        .await;
        return Ok(());
    };

    deps.journal
        .update_status(task_id, TaskStatus::Processing, Some(worker_id), None, false)
        .await?;

    let ctx = HandlerContext {
        graph: Arc::clone(&deps.graph),
        journal: deps.journal.clone(),
        producer: deps.producer.clone(),
        cancellation,
        worker_id: worker_id.to_owned(),
        task_id,
    };

    debug!(worker_id, %task_id, kind = %envelope.task_type, "invoking handler");
    let outcome = match AssertUnwindSafe(handler.process(&envelope.fields, &ctx))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let reason = panic_message(&panic);
            error!(worker_id, %task_id, kind = %envelope.task_type, panic_message = %reason, "handler panicked");
            Err(crate::errors::HandlerError::Execution(format!(
                "handler panicked: {reason}"
            )))
        }
    };
    run_post_handler(deps, &envelope, task_id, outcome).await
}

/// Best-effort extraction of a panic payload's message, mirroring what the
/// default panic hook prints for the common `&str`/`String` payloads.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

async fn run_post_handler(
    deps: &WorkerPoolDeps,
    envelope: &Envelope,
    task_id: TaskId,
    outcome: Result<(), crate::errors::HandlerError>,
) -> Result<(), OrchestratorError> {
    deps.queue.ack_processed(envelope).await?;

    match outcome {
        Ok(()) => {
            deps.journal
                .update_status(task_id, TaskStatus::Completed, None, None, false)
                .await?;
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            deps.journal
                .update_status(task_id, TaskStatus::Failed, None, Some(&message), false)
                .await?;
            Ok(())
        }
    }
}

async fn mark_failed_best_effort(journal: &TaskJournal, task_id: TaskId, message: &str) {
    if let Err(e) = journal
        .update_status(task_id, TaskStatus::Failed, None, Some(message), false)
        .await
    {
        // A journal row may not exist when a test or operator injects an
        // envelope directly (spec.md S6); that is the documented benign
        // case, so only warn.
        warn!(%task_id, error = %e, "journal update for unknown-kind task failed");
    }
}

/// Spawn `n` workers sharing `deps`, returning their join handles.
pub fn spawn_pool(
    n: u32,
    deps: WorkerPoolDeps,
    shutdown_rx: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..n)
        .map(|_| {
            let worker_id = generate_worker_id();
            let deps = deps.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(run_worker(worker_id, deps, shutdown_rx))
        })
        .collect()
}
