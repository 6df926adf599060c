//! The knowledge-graph engine seam.
//!
//! `spec.md` §1 scopes the graph engine's internal algorithms out of this
//! repository: "the internal algorithms of the graph engine itself are
//! external." [`GraphEngine`] is that seam — the only interface the four
//! handlers in [`crate::handlers`] are allowed to call through. A real
//! deployment wires a client for the actual graph database in; tests use
//! [`MockGraphEngine`].

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HandlerError;

/// An Episodic node: the graph's representation of one ingested Episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicNode {
    /// Stable identifier; equals the producer-supplied `episodeId`.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// Raw ingested text.
    pub content: String,
    /// Free-text description of where the content came from.
    pub source_description: String,
    /// e.g. `"message"`, `"text"`, `"json"`.
    pub source_kind: String,
    /// Owning group.
    pub group_id: String,
    /// `"Processing"` until [`GraphEngine::add_episode`] completes it.
    pub status: EpisodeStatus,
    /// Point in time the content is valid as of; preserved across
    /// [`crate::handlers::incremental_refresh`] reprocessing.
    pub valid_at: DateTime<Utc>,
    /// Optional correlation attributes, propagated onto connected entities.
    pub tenant_id: Option<String>,
    /// See [`Self::tenant_id`].
    pub project_id: Option<String>,
    /// See [`Self::tenant_id`].
    pub user_id: Option<String>,
}

/// Lifecycle of an [`EpisodicNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpisodeStatus {
    /// Created transactionally by the Producer's upstream code, before the
    /// ingest handler runs.
    Processing,
    /// Entities and edges have been extracted and attached.
    Completed,
}

/// A derived graph vertex extracted from one or more Episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNode {
    /// Stable identifier.
    pub uuid: String,
    /// Display name, used as a weak similarity signal by deduplication.
    pub name: String,
    /// Owning group.
    pub group_id: String,
    /// Propagated from the episode(s) that mention this entity.
    pub tenant_id: Option<String>,
    /// See [`Self::tenant_id`].
    pub project_id: Option<String>,
    /// See [`Self::tenant_id`].
    pub user_id: Option<String>,
    /// Community uuids this entity belongs to (`BELONGS_TO` edges).
    pub community_uuids: Vec<String>,
}

/// A group-scoped clustering of [`EntityNode`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityNode {
    /// Stable identifier.
    pub uuid: String,
    /// Display name.
    pub name: String,
    /// The group this community was built from. Set equal to `project_id`
    /// once rebuild completes, per `spec.md` §4.8.2.
    pub group_id: String,
    /// Set to `group_id` by the rebuild handler.
    pub project_id: String,
    /// Count of outgoing `HAS_MEMBER` edges, computed by the rebuild
    /// handler after member edges are persisted.
    pub member_count: i64,
}

/// The seam handlers call through. Every method corresponds to a named
/// effect in `spec.md` §4.8; the method's internal algorithm (entity
/// extraction, similarity scoring, community detection) is out of scope —
/// only its side effects on the graph are specified.
#[async_trait]
pub trait GraphEngine: Send + Sync {
    /// Extract entities and edges from the Episodic node `episode_uuid`,
    /// attach them via `MENTIONS`, and transition the node to `Completed`.
    /// A no-op success if the node is already `Completed` (idempotency, per
    /// `spec.md` §4.8.1).
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the node does not exist or extraction
    /// fails.
    async fn add_episode(&self, episode_uuid: &str) -> Result<(), HandlerError>;

    /// Re-run extraction for `episode_uuid` unconditionally, even if it is
    /// already `Completed`, preserving its `uuid` and `valid_at`. Used only
    /// by [`crate::handlers::incremental_refresh`], which must force
    /// reprocessing rather than short-circuit on the idempotency check
    /// [`Self::add_episode`] applies (`spec.md` §4.8.4).
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the node does not exist or extraction
    /// fails.
    async fn reprocess_episode(&self, episode_uuid: &str) -> Result<(), HandlerError>;

    /// Propagate `tenant_id`/`project_id`/`user_id` onto every Entity newly
    /// connected to `episode_uuid` via `MENTIONS`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the episode does not exist.
    async fn propagate_episode_attributes(
        &self,
        episode_uuid: &str,
        tenant_id: Option<&str>,
        project_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<(), HandlerError>;

    /// Fetch an episode by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if it does not exist.
    async fn get_episode(&self, episode_uuid: &str) -> Result<EpisodicNode, HandlerError>;

    /// Most recently created episodes in `group_id`, newest first, capped
    /// at `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the query fails.
    async fn recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>, HandlerError>;

    /// Delete every Community whose `group_id` equals `group_id`. Must not
    /// touch communities of any other group.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the delete fails.
    async fn remove_communities(&self, group_id: &str) -> Result<(), HandlerError>;

    /// Run community detection over `group_id`'s subgraph and persist the
    /// resulting communities (with `project_id` and `member_count` set),
    /// plus the `HAS_MEMBER` edges backing `member_count`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if detection or persistence fails.
    async fn build_communities(&self, group_id: &str) -> Result<Vec<CommunityNode>, HandlerError>;

    /// All Entity nodes in `group_id`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the query fails.
    async fn entities_in_group(&self, group_id: &str) -> Result<Vec<EntityNode>, HandlerError>;

    /// Redirect every edge incident to `duplicate_uuid` onto
    /// `canonical_uuid` (skipping edges that would duplicate an existing
    /// `RELATES_TO`), merge community memberships, coalesce
    /// `canonical.project_id`, then delete the duplicate node.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] if the merge fails; callers are expected to
    /// isolate per-pair failures (`spec.md` §4.8.3).
    async fn merge_entities(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> Result<(), HandlerError>;
}

/// Production [`GraphEngine`]: a thin HTTP client for the external graph
/// engine's own API. The engine's query planner and extraction algorithms
/// are out of scope per `spec.md` §1; this client only issues the effect
/// calls named in `spec.md` §4.8 and decodes their JSON responses.
#[derive(Clone)]
pub struct HttpGraphEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGraphEngine {
    /// Wrap `base_url` (no trailing slash expected).
    #[must_use]
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<(), HandlerError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| HandlerError::Execution(format!("graph engine request failed: {e}")))?;
        ensure_success(response).await.map(|_| ())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, HandlerError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(HandlerError::Execution(format!(
            "graph engine returned {status}: {body}"
        )))
    }
}

#[async_trait]
impl GraphEngine for HttpGraphEngine {
    async fn add_episode(&self, episode_uuid: &str) -> Result<(), HandlerError> {
        self.post(
            &format!("/episodes/{episode_uuid}/add"),
            serde_json::json!({}),
        )
        .await
    }

    async fn reprocess_episode(&self, episode_uuid: &str) -> Result<(), HandlerError> {
        self.post(
            &format!("/episodes/{episode_uuid}/reprocess"),
            serde_json::json!({}),
        )
        .await
    }

    async fn propagate_episode_attributes(
        &self,
        episode_uuid: &str,
        tenant_id: Option<&str>,
        project_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<(), HandlerError> {
        self.post(
            &format!("/episodes/{episode_uuid}/propagate-attributes"),
            serde_json::json!({
                "tenant_id": tenant_id,
                "project_id": project_id,
                "user_id": user_id,
            }),
        )
        .await
    }

    async fn get_episode(&self, episode_uuid: &str) -> Result<EpisodicNode, HandlerError> {
        let response = self
            .client
            .get(self.url(&format!("/episodes/{episode_uuid}")))
            .send()
            .await
            .map_err(|e| HandlerError::Execution(format!("graph engine request failed: {e}")))?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| HandlerError::Execution(format!("malformed episode response: {e}")))
    }

    async fn recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>, HandlerError> {
        let response = self
            .client
            .get(self.url("/episodes/recent"))
            .query(&[("group_id", group_id), ("limit", &limit.to_string())])
            .send()
            .await
            .map_err(|e| HandlerError::Execution(format!("graph engine request failed: {e}")))?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| HandlerError::Execution(format!("malformed episode list response: {e}")))
    }

    async fn remove_communities(&self, group_id: &str) -> Result<(), HandlerError> {
        self.post(
            "/communities/remove",
            serde_json::json!({ "group_id": group_id }),
        )
        .await
    }

    async fn build_communities(&self, group_id: &str) -> Result<Vec<CommunityNode>, HandlerError> {
        let response = self
            .client
            .post(self.url("/communities/build"))
            .json(&serde_json::json!({ "group_id": group_id }))
            .send()
            .await
            .map_err(|e| HandlerError::Execution(format!("graph engine request failed: {e}")))?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| HandlerError::Execution(format!("malformed community response: {e}")))
    }

    async fn entities_in_group(&self, group_id: &str) -> Result<Vec<EntityNode>, HandlerError> {
        let response = self
            .client
            .get(self.url("/entities"))
            .query(&[("group_id", group_id)])
            .send()
            .await
            .map_err(|e| HandlerError::Execution(format!("graph engine request failed: {e}")))?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| HandlerError::Execution(format!("malformed entity list response: {e}")))
    }

    async fn merge_entities(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> Result<(), HandlerError> {
        self.post(
            "/entities/merge",
            serde_json::json!({
                "duplicate_uuid": duplicate_uuid,
                "canonical_uuid": canonical_uuid,
            }),
        )
        .await
    }
}

/// An in-memory [`GraphEngine`] used by tests. Deliberately simplistic:
/// `add_episode` mints one Entity per call (named after the episode) rather
/// than running real extraction, and `build_communities` groups entities by
/// a caller-agnostic single cluster — enough to exercise the orchestrator's
/// side effects (scoping, idempotency, member counts) without reimplementing
/// the graph engine's internals.
#[derive(Default)]
pub struct MockGraphEngine {
    episodes: Mutex<HashMap<String, EpisodicNode>>,
    entities: Mutex<HashMap<String, EntityNode>>,
    mentions: Mutex<HashMap<String, Vec<String>>>,
    communities: Mutex<HashMap<String, CommunityNode>>,
    has_member: Mutex<HashMap<String, Vec<String>>>,
}

impl MockGraphEngine {
    /// An empty mock engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an Episodic node directly, bypassing the Producer's usual
    /// transactional creation (test setup helper).
    pub fn seed_episode(&self, episode: EpisodicNode) {
        self.episodes
            .lock()
            .expect("mock graph mutex poisoned")
            .insert(episode.uuid.clone(), episode);
    }

    /// Seed a Community directly (test setup helper for S5-style scenarios).
    pub fn seed_community(&self, community: CommunityNode) {
        self.communities
            .lock()
            .expect("mock graph mutex poisoned")
            .insert(community.uuid.clone(), community);
    }

    /// Seed an Entity directly (test setup helper for deduplication tests).
    pub fn seed_entity(&self, entity: EntityNode) {
        self.entities
            .lock()
            .expect("mock graph mutex poisoned")
            .insert(entity.uuid.clone(), entity);
    }

    /// Read back every community, for assertions.
    #[must_use]
    pub fn all_communities(&self) -> Vec<CommunityNode> {
        self.communities
            .lock()
            .expect("mock graph mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Read back every entity, for assertions.
    #[must_use]
    pub fn all_entities(&self) -> Vec<EntityNode> {
        self.entities
            .lock()
            .expect("mock graph mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GraphEngine for MockGraphEngine {
    async fn add_episode(&self, episode_uuid: &str) -> Result<(), HandlerError> {
        let mut episodes = self.episodes.lock().expect("mock graph mutex poisoned");
        let episode = episodes
            .get_mut(episode_uuid)
            .ok_or_else(|| HandlerError::Execution(format!("episode {episode_uuid} not found")))?;

        if episode.status == EpisodeStatus::Completed {
            return Ok(());
        }

        let entity_uuid = format!("entity-{episode_uuid}");
        let entity = EntityNode {
            uuid: entity_uuid.clone(),
            name: episode.name.clone(),
            group_id: episode.group_id.clone(),
            tenant_id: episode.tenant_id.clone(),
            project_id: episode.project_id.clone(),
            user_id: episode.user_id.clone(),
            community_uuids: Vec::new(),
        };
        episode.status = EpisodeStatus::Completed;
        drop(episodes);

        self.entities
            .lock()
            .expect("mock graph mutex poisoned")
            .insert(entity_uuid.clone(), entity);
        self.mentions
            .lock()
            .expect("mock graph mutex poisoned")
            .entry(episode_uuid.to_owned())
            .or_default()
            .push(entity_uuid);
        Ok(())
    }

    async fn reprocess_episode(&self, episode_uuid: &str) -> Result<(), HandlerError> {
        {
            let mut episodes = self.episodes.lock().expect("mock graph mutex poisoned");
            let episode = episodes.get_mut(episode_uuid).ok_or_else(|| {
                HandlerError::Execution(format!("episode {episode_uuid} not found"))
            })?;
            episode.status = EpisodeStatus::Processing;
        }
        self.add_episode(episode_uuid).await
    }

    async fn propagate_episode_attributes(
        &self,
        episode_uuid: &str,
        tenant_id: Option<&str>,
        project_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<(), HandlerError> {
        let mentioned = self
            .mentions
            .lock()
            .expect("mock graph mutex poisoned")
            .get(episode_uuid)
            .cloned()
            .unwrap_or_default();

        let mut entities = self.entities.lock().expect("mock graph mutex poisoned");
        for uuid in mentioned {
            if let Some(entity) = entities.get_mut(&uuid) {
                entity.tenant_id = tenant_id.map(ToOwned::to_owned);
                entity.project_id = project_id.map(ToOwned::to_owned);
                entity.user_id = user_id.map(ToOwned::to_owned);
            }
        }
        Ok(())
    }

    async fn get_episode(&self, episode_uuid: &str) -> Result<EpisodicNode, HandlerError> {
        self.episodes
            .lock()
            .expect("mock graph mutex poisoned")
            .get(episode_uuid)
            .cloned()
            .ok_or_else(|| HandlerError::Execution(format!("episode {episode_uuid} not found")))
    }

    async fn recent_episodes(
        &self,
        group_id: &str,
        limit: usize,
    ) -> Result<Vec<EpisodicNode>, HandlerError> {
        let mut episodes: Vec<EpisodicNode> = self
            .episodes
            .lock()
            .expect("mock graph mutex poisoned")
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect();
        episodes.sort_by(|a, b| b.valid_at.cmp(&a.valid_at));
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn remove_communities(&self, group_id: &str) -> Result<(), HandlerError> {
        self.communities
            .lock()
            .expect("mock graph mutex poisoned")
            .retain(|_, c| c.group_id != group_id);
        Ok(())
    }

    async fn build_communities(&self, group_id: &str) -> Result<Vec<CommunityNode>, HandlerError> {
        let entities = self.entities_in_group(group_id).await?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let community_uuid = format!("community-{group_id}");
        let community = CommunityNode {
            uuid: community_uuid.clone(),
            name: format!("{group_id} community"),
            group_id: group_id.to_owned(),
            project_id: group_id.to_owned(),
            member_count: i64::try_from(entities.len()).unwrap_or(i64::MAX),
        };

        self.communities
            .lock()
            .expect("mock graph mutex poisoned")
            .insert(community_uuid.clone(), community.clone());
        self.has_member.lock().expect("mock graph mutex poisoned").insert(
            community_uuid,
            entities.iter().map(|e| e.uuid.clone()).collect(),
        );
        Ok(vec![community])
    }

    async fn entities_in_group(&self, group_id: &str) -> Result<Vec<EntityNode>, HandlerError> {
        Ok(self
            .entities
            .lock()
            .expect("mock graph mutex poisoned")
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn merge_entities(
        &self,
        duplicate_uuid: &str,
        canonical_uuid: &str,
    ) -> Result<(), HandlerError> {
        let mut entities = self.entities.lock().expect("mock graph mutex poisoned");
        let duplicate = entities
            .get(duplicate_uuid)
            .cloned()
            .ok_or_else(|| HandlerError::Execution(format!("{duplicate_uuid} not found")))?;

        {
            let canonical = entities.get_mut(canonical_uuid).ok_or_else(|| {
                HandlerError::Execution(format!("{canonical_uuid} not found"))
            })?;
            if canonical.project_id.is_none() {
                canonical.project_id = duplicate.project_id.clone();
            }
            for community in duplicate.community_uuids {
                if !canonical.community_uuids.contains(&community) {
                    canonical.community_uuids.push(community);
                }
            }
        }
        entities.remove(duplicate_uuid);
        Ok(())
    }
}
