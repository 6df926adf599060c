//! Episode Ingest handler (`kind = "add_episode"`, `spec.md` §4.8.1).
//!
//! Grounded on `examples/original_source/.../episode.py`'s
//! `EpisodeTaskHandler` (not reproduced in the retrieval pack's file list
//! directly, but its sibling handlers in the same package share this shape)
//! and on `redis_queue.py`'s `add_episode` payload fields
//! (`group_id`, `name`, `content`, `source_description`, `episode_type`,
//! `uuid`, `tenant_id`, `project_id`, `user_id`).

use async_trait::async_trait;

use super::{optional_str, required_str};
use crate::errors::HandlerError;
use crate::registry::{Handler, HandlerContext};

/// Extracts entities and edges from an Episodic node and attaches tenant/
/// project/user correlation to the entities newly mentioned.
pub struct AddEpisodeHandler;

#[async_trait]
impl Handler for AddEpisodeHandler {
    fn kind(&self) -> &str {
        "add_episode"
    }

    fn timeout_seconds(&self) -> u64 {
        600
    }

    async fn process(
        &self,
        payload: &serde_json::Value,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let episode_id = required_str(payload, "episode_id")?;
        let tenant_id = optional_str(payload, "tenant_id");
        let project_id = optional_str(payload, "project_id");
        let user_id = optional_str(payload, "user_id");

        // Idempotent: a no-op success if the node is already Completed
        // (spec.md §4.8.1), so at-most-once effective ingest holds
        // regardless of how many times Recovery causes this to run for
        // the same episodeId.
        ctx.graph.add_episode(episode_id).await?;

        ctx.graph
            .propagate_episode_attributes(
                episode_id,
                tenant_id.as_deref(),
                project_id.as_deref(),
                user_id.as_deref(),
            )
            .await?;

        // Schema auto-learning (syncing newly observed Entity/Edge labels
        // into the domain's schema registry) is an external collaborator
        // per spec.md §1 and best-effort by contract; there is no seam for
        // it on GraphEngine because its own internals are out of scope, so
        // it is intentionally not invoked here.

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::watch;

    use super::*;
    use crate::graph::{EpisodeStatus, EpisodicNode, MockGraphEngine};
    use crate::journal::TaskJournal;
    use crate::producer::Producer;
    use crate::queue::InMemoryQueueStore;
    use crate::types::TaskId;

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
            tenant_id: Some("t1".to_owned()),
            project_id: Some("p1".to_owned()),
            user_id: Some("u1".to_owned()),
        });
    }

    // This handler never touches ctx.journal or ctx.producer, so both are
    // built against a lazy (non-connecting) Postgres pool and the in-memory
    // fake Queue Store rather than a live database and Redis instance.
    fn unreachable_journal() -> TaskJournal {
        TaskJournal::new(
            sqlx::PgPool::connect_lazy("postgres://unused/unused").expect("lazy pool never connects"),
        )
    }

    fn unreachable_producer() -> Producer {
        Producer::new(unreachable_journal(), Arc::new(InMemoryQueueStore::new()))
    }

    #[tokio::test]
    async fn completing_an_episode_propagates_entity_attributes() {
        let graph = Arc::new(MockGraphEngine::new());
        seed_episode(&graph, "ep-1", "g1");
        let payload = serde_json::json!({
            "episode_id": "ep-1",
            "tenant_id": "t1",
            "project_id": "p1",
            "user_id": "u1",
        });

        let handler = AddEpisodeHandler;
        let (_tx, rx) = watch::channel(false);
        let ctx = HandlerContext {
            graph: graph.clone(),
            journal: unreachable_journal(),
            producer: unreachable_producer(),
            cancellation: rx,
            worker_id: "w".to_owned(),
            task_id: TaskId::new(),
        };

        handler.process(&payload, &ctx).await.unwrap();

        let episode = graph.get_episode("ep-1").await.unwrap();
        assert_eq!(episode.status, EpisodeStatus::Completed);

        let entities = graph.all_entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].tenant_id.as_deref(), Some("t1"));
        assert_eq!(entities[0].project_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn completing_an_already_completed_episode_is_a_noop() {
        let graph = Arc::new(MockGraphEngine::new());
        seed_episode(&graph, "ep-2", "g1");
        graph.add_episode("ep-2").await.unwrap();
        assert_eq!(graph.all_entities().len(), 1);

        let payload = serde_json::json!({ "episode_id": "ep-2" });
        let handler = AddEpisodeHandler;
        let (_tx, rx) = watch::channel(false);
        let ctx = HandlerContext {
            graph: graph.clone(),
            journal: unreachable_journal(),
            producer: unreachable_producer(),
            cancellation: rx,
            worker_id: "w".to_owned(),
            task_id: TaskId::new(),
        };

        handler.process(&payload, &ctx).await.unwrap();
        assert_eq!(graph.all_entities().len(), 1);
    }

    #[tokio::test]
    async fn missing_episode_id_is_invalid_input() {
        let graph = Arc::new(MockGraphEngine::new());
        let handler = AddEpisodeHandler;
        let (_tx, rx) = watch::channel(false);
        let ctx = HandlerContext {
            graph,
            journal: unreachable_journal(),
            producer: unreachable_producer(),
            cancellation: rx,
            worker_id: "w".to_owned(),
            task_id: TaskId::new(),
        };

        let err = handler
            .process(&serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidInput(_)));
    }
}
