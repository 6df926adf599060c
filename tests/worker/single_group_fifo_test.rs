//! Scenario: two tasks in the same group are processed in enqueue order,
//! never concurrently (`spec.md` §4.4 invariant 2).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use taskyard::graph::{EpisodeStatus, EpisodicNode, GraphEngine, MockGraphEngine};
use taskyard::handlers::AddEpisodeHandler;
use taskyard::journal::TaskJournal;
use taskyard::producer::{Correlation, EpisodeFields, Producer};
use taskyard::queue::{InMemoryQueueStore, QueueStore};
use taskyard::registry::HandlerRegistry;
use taskyard::worker::{run_worker, WorkerPoolDeps};

fn seed_episode(graph: &MockGraphEngine, uuid: &str, group_id: &str) {
    graph.seed_episode(EpisodicNode {
        uuid: uuid.to_owned(),
        name: "ep".to_owned(),
        content: "hello".to_owned(),
        source_description: "test".to_owned(),
        source_kind: "text".to_owned(),
        group_id: group_id.to_owned(),
        status: EpisodeStatus::Processing,
        valid_at: Utc::now(),
        tenant_id: None,
        project_id: None,
        user_id: None,
    });
}

#[sqlx::test(migrations = "./migrations")]
async fn tasks_in_one_group_run_in_fifo_order(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
    let mock_graph = MockGraphEngine::new();
    seed_episode(&mock_graph, "ep-1", "group-a");
    seed_episode(&mock_graph, "ep-2", "group-a");
    let graph: Arc<dyn GraphEngine> = Arc::new(mock_graph);

    let producer = Producer::new(journal.clone(), Arc::clone(&queue));

    let first = producer
        .enqueue_episode(
            "group-a",
            EpisodeFields {
                episode_id: "ep-1".to_owned(),
                name: "one".to_owned(),
                content: "c".to_owned(),
                source_description: "d".to_owned(),
                source_kind: "text".to_owned(),
                tenant_id: None,
                project_id: None,
                user_id: None,
            },
            Correlation::default(),
        )
        .await
        .expect("first enqueue should succeed");
    let second = producer
        .enqueue_episode(
            "group-a",
            EpisodeFields {
                episode_id: "ep-2".to_owned(),
                name: "two".to_owned(),
                content: "c".to_owned(),
                source_description: "d".to_owned(),
                source_kind: "text".to_owned(),
                tenant_id: None,
                project_id: None,
                user_id: None,
            },
            Correlation::default(),
        )
        .await
        .expect("second enqueue should succeed");

    let registry = Arc::new(HandlerRegistry::new());
    registry.register(Arc::new(AddEpisodeHandler));

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

    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = shutdown_tx.send(true);
    handle.await.expect("worker task should not panic");

    let first_task = journal.find_by_id(first).await.expect("first task should exist");
    let second_task = journal.find_by_id(second).await.expect("second task should exist");

    assert_eq!(first_task.status, taskyard::types::TaskStatus::Completed);
    assert_eq!(second_task.status, taskyard::types::TaskStatus::Completed);

    let first_started = first_task.started_at.expect("first task should have started");
    let second_started = second_task.started_at.expect("second task should have started");
    assert!(first_started <= second_started, "FIFO within a group must be honored");
}
