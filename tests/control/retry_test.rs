//! Scenario S4: retrying a task resets it to PENDING and re-enqueues it,
//! except when a copy is already in flight, in which case only the Journal
//! row is reset (`SPEC_FULL.md` §9 Open Question 1).

use std::sync::Arc;

use taskyard::control::Controller;
use taskyard::errors::OrchestratorError;
use taskyard::journal::{CreateTaskParams, TaskJournal};
use taskyard::queue::{Envelope, InMemoryQueueStore, QueueStore};
use taskyard::types::{TaskId, TaskStatus};

async fn create_failed_task(journal: &TaskJournal, group_id: &str) -> TaskId {
    let id = TaskId::new();
    journal
        .create(CreateTaskParams {
            id,
            group_id: group_id.to_owned(),
            task_type: "add_episode".to_owned(),
            payload: serde_json::json!({ "episode_id": "ep-1" }),
            entity_id: None,
            entity_type: None,
            parent_task_id: None,
        })
        .await
        .expect("journal create should succeed");
    journal
        .update_status(id, TaskStatus::Failed, None, Some("boom"), false)
        .await
        .expect("journal update to failed should succeed");
    id
}

#[sqlx::test(migrations = "./migrations")]
async fn retry_resets_and_reenqueues_a_failed_task(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let controller = Controller::new(journal.clone(), Arc::clone(&queue));

    let id = create_failed_task(&journal, "group-a").await;

    controller.retry(id).await.expect("retry should succeed");

    let task = journal.find_by_id(id).await.expect("task should exist");
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.error_message.is_none());
    assert_eq!(task.retry_count, 1);

    assert_eq!(
        queue.group_queue_depth("group-a").await.expect("depth should read"),
        1,
        "retry must push a fresh envelope when none is already in flight"
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn retry_skips_double_enqueue_when_already_in_flight(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let controller = Controller::new(journal.clone(), Arc::clone(&queue));

    let id = create_failed_task(&journal, "group-a").await;

    // A copy of this task's envelope is still sitting in the in-flight list
    // (e.g. the handler is slow to finish and hasn't acked yet) when an
    // operator calls retry.
    let in_flight = Envelope::new(&id.to_string(), "group-a", "add_episode", serde_json::json!({}));
    queue
        .enqueue("group-a", &in_flight)
        .await
        .expect("seed enqueue should succeed");
    queue
        .pop_one_to_processing("group-a")
        .await
        .expect("moving to processing should succeed");

    controller.retry(id).await.expect("retry should succeed");

    let task = journal.find_by_id(id).await.expect("task should exist");
    assert_eq!(task.status, TaskStatus::Pending);

    assert_eq!(
        queue.group_queue_depth("group-a").await.expect("depth should read"),
        0,
        "retry must not push a second envelope while one is already in flight"
    );
    assert_eq!(
        queue.snapshot_processing().await.expect("snapshot should read").len(),
        1,
        "the original in-flight envelope is left untouched"
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn retry_rejects_a_completed_task(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let controller = Controller::new(journal.clone(), queue);

    let id = TaskId::new();
    journal
        .create(CreateTaskParams {
            id,
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
        .update_status(id, TaskStatus::Completed, None, None, false)
        .await
        .expect("journal update to completed should succeed");

    let err = controller.retry(id).await.expect_err("retry on COMPLETED must fail");
    assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
}
