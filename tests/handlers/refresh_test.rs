//! Covers `IncrementalRefreshHandler`'s `rebuild_communities: true` path,
//! which needs a real Journal since it writes a child task row through
//! `ctx.producer` (`spec.md` §4.8.4).

use std::sync::Arc;

use chrono::Utc;

use taskyard::graph::{EpisodeStatus, EpisodicNode, MockGraphEngine};
use taskyard::handlers::IncrementalRefreshHandler;
use taskyard::journal::TaskJournal;
use taskyard::producer::Producer;
use taskyard::queue::InMemoryQueueStore;
use taskyard::registry::{Handler, HandlerContext};
use taskyard::types::TaskId;

fn episode(uuid: &str, group_id: &str) -> EpisodicNode {
    EpisodicNode {
        uuid: uuid.to_owned(),
        name: uuid.to_owned(),
        content: "hello".to_owned(),
        source_description: "test".to_owned(),
        source_kind: "text".to_owned(),
        group_id: group_id.to_owned(),
        status: EpisodeStatus::Completed,
        valid_at: Utc::now(),
        tenant_id: None,
        project_id: None,
        user_id: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn rebuild_communities_flag_enqueues_a_child_task(pool: sqlx::PgPool) {
    let journal = TaskJournal::new(pool);
    let queue = Arc::new(InMemoryQueueStore::new());
    let producer = Producer::new(journal.clone(), queue.clone());

    let graph = Arc::new(MockGraphEngine::new());
    graph.seed_episode(episode("ep-1", "g1"));

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let parent_task_id = TaskId::new();
    let ctx = HandlerContext {
        graph,
        journal: journal.clone(),
        producer,
        cancellation: rx,
        worker_id: "w".to_owned(),
        task_id: parent_task_id,
    };

    let handler = IncrementalRefreshHandler;
    handler
        .process(
            &serde_json::json!({
                "group_id": "g1",
                "episode_uuids": ["ep-1"],
                "rebuild_communities": true,
            }),
            &ctx,
        )
        .await
        .expect("process should succeed");

    assert_eq!(
        queue.group_queue_depth("g1").await.expect("depth should read"),
        1,
        "a child rebuild_communities envelope must be enqueued"
    );

    let children = journal
        .list_by_group("g1", 10, 0)
        .await
        .expect("listing the group should succeed");
    let child = children
        .iter()
        .find(|t| t.task_type == "rebuild_communities")
        .expect("a rebuild_communities row must exist");
    assert_eq!(child.parent_task_id, Some(parent_task_id));
}
