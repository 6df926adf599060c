//! Scenario: a task whose handler has exceeded its timeout is requeued with
//! scheduling priority and its retry count incremented (`spec.md` §4.6,
//! scenario S3).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use taskyard::journal::{CreateTaskParams, TaskJournal};
use taskyard::queue::{Envelope, InMemoryQueueStore, QueueStore};
use taskyard::recovery::run_recovery_loop;
use taskyard::registry::HandlerRegistry;
use taskyard::types::{TaskId, TaskStatus};

#[sqlx::test(migrations = "./migrations")]
async fn stalled_task_is_requeued_and_retry_count_bumped(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());

    let task_id = TaskId::new();
    journal
        .create(CreateTaskParams {
            id: task_id,
            group_id: "group-a".to_owned(),
            task_type: "add_episode".to_owned(),
            payload: serde_json::json!({}),
            entity_id: None,
            entity_type: None,
            parent_task_id: None,
        })
        .await
        .expect("journal create should succeed");
    journal
        .update_status(task_id, TaskStatus::Processing, Some("stale-worker"), None, false)
        .await
        .expect("journal update to processing should succeed");

    // An envelope whose writer's clock is far in the past: any reasonable
    // handler timeout has already elapsed.
    let stale_envelope = Envelope {
        task_id: task_id.to_string(),
        group_id: "group-a".to_owned(),
        task_type: "add_episode".to_owned(),
        timestamp: chrono::Utc::now().timestamp() - 10_000,
        fields: serde_json::json!({}),
    };
    queue
        .enqueue("group-a", &stale_envelope)
        .await
        .expect("seed enqueue should succeed");
    queue
        .pop_one_to_processing("group-a")
        .await
        .expect("moving to processing should succeed");

    let registry = Arc::new(HandlerRegistry::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(run_recovery_loop(
        journal.clone(),
        Arc::clone(&queue),
        registry,
        Duration::from_millis(20),
        1,
        shutdown_rx,
    ));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = shutdown_tx.send(true);
    handle.await.expect("recovery task should not panic");

    assert!(
        queue.snapshot_processing().await.expect("snapshot should read").is_empty(),
        "the stalled envelope must be removed from the in-flight list"
    );
    assert_eq!(
        queue.group_queue_depth("group-a").await.expect("depth should read"),
        1,
        "the stalled envelope must be back on its group's queue"
    );

    let task = journal.find_by_id(task_id).await.expect("task should exist");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
}
