//! Recovery Loop (C6): one coroutine per worker process that periodically
//! re-queues stalled in-flight work.
//!
//! Grounded on `examples/original_source/.../redis_queue.py`'s
//! `_recovery_loop` (snapshot `processing`, compare `now - timestamp`
//! against the handler's timeout, `lrem` + `lpush` to requeue) and, for the
//! Rust loop/shutdown shape, on the teacher's `heartbeat::run_heartbeat`
//! `tokio::select!` idiom.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::journal::TaskJournal;
use crate::queue::{Envelope, QueueStore};
use crate::registry::HandlerRegistry;
use crate::types::TaskStatus;

/// Run the recovery loop until `shutdown_rx` reports `true`.
///
/// One tick every `period`: snapshot `processing`, requeue every envelope
/// whose age exceeds its handler's declared timeout (`spec.md` §4.6).
pub async fn run_recovery_loop(
    journal: TaskJournal,
    queue: Arc<dyn QueueStore>,
    registry: Arc<HandlerRegistry>,
    period: Duration,
    default_timeout_seconds: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(period_secs = period.as_secs(), "recovery loop started");
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_one_tick(&journal, &queue, &registry, default_timeout_seconds).await;
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("recovery loop stopped");
}

async fn run_one_tick(
    journal: &TaskJournal,
    queue: &Arc<dyn QueueStore>,
    registry: &HandlerRegistry,
    default_timeout_seconds: u64,
) {
    let snapshot = match queue.snapshot_processing().await {
        Ok(envelopes) => envelopes,
        Err(e) => {
            error!(error = %e, "recovery: failed to snapshot processing list");
            return;
        }
    };

    let now = Utc::now().timestamp();

    for envelope in snapshot {
        let limit = registry.timeout_for(&envelope.task_type, default_timeout_seconds);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let age = now.saturating_sub(envelope.timestamp);

        if age > limit {
            recover_one(journal, queue, &envelope, now).await;
        }
    }
}

async fn recover_one(journal: &TaskJournal, queue: &Arc<dyn QueueStore>, envelope: &Envelope, now: i64) {
    // Order matters: requeue the Queue Store entry first. If the Journal
    // update below fails, the envelope is still back in its group queue and
    // will be reprocessed; a Journal row stuck at PROCESSING is a lesser
    // harm than silently dropping the only remaining copy of the work.
    if let Err(e) = queue.requeue_from_processing(envelope, now).await {
        error!(task_id = %envelope.task_id, error = %e, "recovery: failed to requeue envelope");
        return;
    }

    let Ok(task_id) = envelope.task_id.parse() else {
        warn!(task_id = %envelope.task_id, "recovery: malformed task id, requeued without journal update");
        return;
    };

    if let Err(e) = journal
        .update_status(task_id, TaskStatus::Pending, None, None, true)
        .await
    {
        warn!(%task_id, error = %e, "recovery: failed to reset journal row to PENDING");
    } else {
        warn!(%task_id, group_id = %envelope.group_id, kind = %envelope.task_type, "recovery: requeued stalled task");
    }
}
