//! Scenario: an envelope naming an unregistered kind is acked and its
//! journal row marked FAILED rather than wedging the worker (`spec.md` §4.4
//! step 3d, scenario S6).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use taskyard::graph::{GraphEngine, MockGraphEngine};
use taskyard::journal::{CreateTaskParams, TaskJournal};
use taskyard::producer::Producer;
use taskyard::queue::{Envelope, InMemoryQueueStore, QueueStore};
use taskyard::registry::HandlerRegistry;
use taskyard::types::{TaskId, TaskStatus};
use taskyard::worker::{run_worker, WorkerPoolDeps};

#[sqlx::test(migrations = "./migrations")]
async fn unknown_kind_is_acked_and_marked_failed(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let graph: Arc<dyn GraphEngine> = Arc::new(MockGraphEngine::new());
    let producer = Producer::new(journal.clone(), Arc::clone(&queue));

    let task_id = TaskId::new();
    journal
        .create(CreateTaskParams {
            id: task_id,
            group_id: "group-a".to_owned(),
            task_type: "no_such_handler".to_owned(),
            payload: serde_json::json!({}),
            entity_id: None,
            entity_type: None,
            parent_task_id: None,
        })
        .await
        .expect("journal create should succeed");

    let envelope = Envelope::new(
        &task_id.to_string(),
        "group-a",
        "no_such_handler",
        serde_json::json!({}),
    );
    queue
        .enqueue("group-a", &envelope)
        .await
        .expect("raw envelope enqueue should succeed");

    // No handlers registered at all: the registry lookup must fail closed.
    let registry = Arc::new(HandlerRegistry::new());

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
    let handle = tokio::spawn(run_worker("w-test".to_owned(), deps, shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = shutdown_tx.send(true);
    handle.await.expect("worker task should not panic");

    let task = journal.find_by_id(task_id).await.expect("task should exist");
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap_or_default().contains("no_such_handler"));

    assert_eq!(
        queue.group_queue_depth("group-a").await.expect("depth should read"),
        0,
        "the unknown-kind envelope must be acked, not left stuck in-flight"
    );
}
