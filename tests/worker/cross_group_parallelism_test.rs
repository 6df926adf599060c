//! Scenario S2: two tasks in different groups make progress concurrently,
//! each under its own group lock (`spec.md` §4.4's "different groups may
//! progress in parallel up to the combined worker count", scenario S2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use taskyard::errors::HandlerError;
use taskyard::graph::MockGraphEngine;
use taskyard::journal::{CreateTaskParams, TaskJournal};
use taskyard::producer::Producer;
use taskyard::queue::{Envelope, InMemoryQueueStore, QueueStore};
use taskyard::registry::{Handler, HandlerContext, HandlerRegistry};
use taskyard::types::{TaskId, TaskStatus};
use taskyard::worker::{run_worker, WorkerPoolDeps};

/// Sleeps long enough that, with one worker per group, two invocations only
/// overlap if the orchestrator genuinely runs them in parallel rather than
/// serializing through a single shared lock.
struct SlowHandler {
    concurrent: Arc<AtomicUsize>,
    max_concurrent: Arc<AtomicUsize>,
}

#[async_trait]
impl Handler for SlowHandler {
    fn kind(&self) -> &str {
        "slow_kind"
    }

    fn timeout_seconds(&self) -> u64 {
        600
    }

    async fn process(
        &self,
        _payload: &serde_json::Value,
        _ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn seed_task(journal: &TaskJournal, queue: &Arc<dyn QueueStore>, task_id: TaskId, group_id: &str) {
    journal
        .create(CreateTaskParams {
            id: task_id,
            group_id: group_id.to_owned(),
            task_type: "slow_kind".to_owned(),
            payload: serde_json::json!({}),
            entity_id: None,
            entity_type: None,
            parent_task_id: None,
        })
        .await
        .expect("journal create should succeed");

    let envelope = Envelope::new(&task_id.to_string(), group_id, "slow_kind", serde_json::json!({}));
    queue
        .enqueue(group_id, &envelope)
        .await
        .expect("seed enqueue should succeed");
}

#[sqlx::test(migrations = "./migrations")]
async fn two_groups_make_progress_concurrently_under_two_workers(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let graph = Arc::new(MockGraphEngine::new());

    let task_x = TaskId::new();
    let task_y = TaskId::new();
    seed_task(&journal, &queue, task_x, "g1").await;
    seed_task(&journal, &queue, task_y, "g2").await;

    let concurrent = Arc::new(AtomicUsize::new(0));
    let max_concurrent = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(SlowHandler {
        concurrent: Arc::clone(&concurrent),
        max_concurrent: Arc::clone(&max_concurrent),
    }));

    let producer = Producer::new(journal.clone(), Arc::clone(&queue));
    let deps = WorkerPoolDeps {
        journal: journal.clone(),
        queue: Arc::clone(&queue),
        registry,
        graph,
        producer,
        sample_size: 5,
        group_lock_ttl_seconds: 3600,
        default_handler_timeout_seconds: 600,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_a = tokio::spawn(run_worker("w-a".to_owned(), deps.clone(), shutdown_rx.clone()));
    let worker_b = tokio::spawn(run_worker("w-b".to_owned(), deps, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let _ = shutdown_tx.send(true);
    worker_a.await.expect("worker a should not panic");
    worker_b.await.expect("worker b should not panic");

    let x = journal.find_by_id(task_x).await.expect("task x should exist");
    let y = journal.find_by_id(task_y).await.expect("task y should exist");
    assert_eq!(x.status, TaskStatus::Completed);
    assert_eq!(y.status, TaskStatus::Completed);

    assert_eq!(
        max_concurrent.load(Ordering::SeqCst),
        2,
        "two workers claiming distinct groups must run their handlers concurrently"
    );
}
