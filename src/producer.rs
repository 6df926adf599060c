//! Producer API (C3): the entry points that turn a caller's request into a
//! durable Journal row plus a queued envelope.
//!
//! `spec.md` §4.3's behavior, reproduced exactly: generate a task id, write
//! `Journal(PENDING)`, build an envelope, enqueue it; if the Journal write
//! fails nothing is enqueued; if the Queue Store write fails the Journal row
//! is marked FAILED with a clear cause. Producers never block on workers.

use std::sync::Arc;

use serde_json::json;

use crate::errors::{OrchestratorError, QueueError};
use crate::journal::{CreateTaskParams, TaskJournal};
use crate::queue::{Envelope, QueueStore};
use crate::types::{TaskId, TaskStatus};

/// The hardcoded "recent episodes" window used when
/// [`crate::handlers::incremental_refresh`] is not given explicit
/// `episodeUuids`. Named per `SPEC_FULL.md` §9 Open Question 2: kept as a
/// reviewable constant, not rederived from configuration, because the
/// source gave no rationale for 100 specifically.
pub const INCREMENTAL_REFRESH_DEFAULT_WINDOW: usize = 100;

/// Fields specific to an episode-ingest task, mirroring `spec.md` §4.8.1's
/// input shape.
#[derive(Debug, Clone)]
pub struct EpisodeFields {
    /// Must match an Episodic node already created (in "Processing" state)
    /// by the Producer's upstream code.
    pub episode_id: String,
    /// Display name.
    pub name: String,
    /// Raw content to ingest.
    pub content: String,
    /// Free-text description of the content's origin.
    pub source_description: String,
    /// e.g. `"message"`, `"text"`, `"json"`.
    pub source_kind: String,
    /// Tenant-level correlation.
    pub tenant_id: Option<String>,
    /// Project-level correlation.
    pub project_id: Option<String>,
    /// User-level correlation.
    pub user_id: Option<String>,
}

/// Correlation back to a domain entity for the status UI, plus an optional
/// parent task id, mirroring `spec.md` §3's `entityId`/`entityKind`/
/// `parentTaskId` fields.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    /// See [`crate::types::Task::entity_id`].
    pub entity_id: Option<String>,
    /// See [`crate::types::Task::entity_type`].
    pub entity_type: Option<String>,
    /// See [`crate::types::Task::parent_task_id`].
    pub parent_task_id: Option<TaskId>,
}

/// Input to [`Producer::enqueue_deduplicate`], `spec.md` §4.8.3.
#[derive(Debug, Clone)]
pub struct DeduplicateParams {
    /// The group to deduplicate within.
    pub group_id: String,
    /// Similarity score above which two entities are considered duplicates,
    /// in `[0, 1]`.
    pub similarity_threshold: f64,
    /// If `true`, the handler logs the candidate pairs and exits without
    /// mutating the graph.
    pub dry_run: bool,
    /// Optional project correlation, coalesced onto survivors during merge.
    pub project_id: Option<String>,
}

/// Input to [`Producer::enqueue_incremental_refresh`], `spec.md` §4.8.4.
#[derive(Debug, Clone, Default)]
pub struct IncrementalRefreshParams {
    /// The group to refresh.
    pub group_id: String,
    /// Explicit episodes to reprocess; if empty, the most recent
    /// [`INCREMENTAL_REFRESH_DEFAULT_WINDOW`] in the group are used.
    pub episode_uuids: Vec<String>,
    /// If `true`, a child rebuild-communities task is enqueued after
    /// refresh completes.
    pub rebuild_communities: bool,
    /// Optional correlation, propagated onto refreshed episodes' entities.
    pub project_id: Option<String>,
    /// See [`Self::project_id`].
    pub tenant_id: Option<String>,
    /// See [`Self::project_id`].
    pub user_id: Option<String>,
}

/// Handle used by both the HTTP producer surface (`api/`) and, internally,
/// by handlers that emit child tasks (e.g. incremental-refresh's
/// rebuild-communities child, `spec.md` §4.8.4).
#[derive(Clone)]
pub struct Producer {
    journal: TaskJournal,
    queue: Arc<dyn QueueStore>,
}

impl Producer {
    /// Wrap a Journal and Queue Store handle.
    #[must_use]
    pub fn new(journal: TaskJournal, queue: Arc<dyn QueueStore>) -> Self {
        Self { journal, queue }
    }

    /// `kind = "add_episode"`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the Journal write fails (nothing is
    /// enqueued), or if the Queue Store write fails after the Journal row is
    /// already marked FAILED.
    pub async fn enqueue_episode(
        &self,
        group_id: &str,
        fields: EpisodeFields,
        correlation: Correlation,
    ) -> Result<TaskId, OrchestratorError> {
        let payload = json!({
            "episode_id": fields.episode_id,
            "name": fields.name,
            "content": fields.content,
            "source_description": fields.source_description,
            "source_kind": fields.source_kind,
            "tenant_id": fields.tenant_id,
            "project_id": fields.project_id,
            "user_id": fields.user_id,
        });
        self.enqueue("add_episode", group_id, payload, correlation)
            .await
    }

    /// `kind = "rebuild_communities"`. `group_id` must be non-empty;
    /// `spec.md` §4.8.2 and §9 Open Question 3 forbid the magic `"global"`
    /// value meaning "all groups."
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidTransition`] if `group_id` is
    /// empty, or the errors documented on [`Self::enqueue_episode`].
    pub async fn enqueue_rebuild_communities(
        &self,
        group_id: &str,
    ) -> Result<TaskId, OrchestratorError> {
        if group_id.is_empty() {
            return Err(OrchestratorError::InvalidTransition(
                "rebuild_communities requires a non-empty groupId".to_owned(),
            ));
        }
        let payload = json!({ "group_id": group_id });
        self.enqueue(
            "rebuild_communities",
            group_id,
            payload,
            Correlation {
                entity_id: Some(group_id.to_owned()),
                entity_type: Some("group".to_owned()),
                parent_task_id: None,
            },
        )
        .await
    }

    /// `kind = "deduplicate_entities"`.
    ///
    /// # Errors
    ///
    /// See [`Self::enqueue_episode`].
    pub async fn enqueue_deduplicate(
        &self,
        params: DeduplicateParams,
    ) -> Result<TaskId, OrchestratorError> {
        let payload = json!({
            "group_id": params.group_id,
            "similarity_threshold": params.similarity_threshold,
            "dry_run": params.dry_run,
            "project_id": params.project_id,
        });
        self.enqueue(
            "deduplicate_entities",
            &params.group_id.clone(),
            payload,
            Correlation::default(),
        )
        .await
    }

    /// `kind = "incremental_refresh"`.
    ///
    /// # Errors
    ///
    /// See [`Self::enqueue_episode`].
    pub async fn enqueue_incremental_refresh(
        &self,
        params: IncrementalRefreshParams,
    ) -> Result<TaskId, OrchestratorError> {
        let payload = json!({
            "group_id": params.group_id,
            "episode_uuids": params.episode_uuids,
            "rebuild_communities": params.rebuild_communities,
            "project_id": params.project_id,
            "tenant_id": params.tenant_id,
            "user_id": params.user_id,
        });
        self.enqueue(
            "incremental_refresh",
            &params.group_id.clone(),
            payload,
            Correlation::default(),
        )
        .await
    }

    /// Enqueue a child task on behalf of a handler; sets `parent_task_id`.
    /// Used by [`crate::handlers::incremental_refresh`] to spawn a
    /// rebuild-communities task.
    ///
    /// # Errors
    ///
    /// See [`Self::enqueue_episode`].
    pub async fn enqueue_child_rebuild_communities(
        &self,
        group_id: &str,
        parent_task_id: TaskId,
    ) -> Result<TaskId, OrchestratorError> {
        if group_id.is_empty() {
            return Err(OrchestratorError::InvalidTransition(
                "rebuild_communities requires a non-empty groupId".to_owned(),
            ));
        }
        let payload = json!({ "group_id": group_id });
        self.enqueue(
            "rebuild_communities",
            group_id,
            payload,
            Correlation {
                entity_id: Some(group_id.to_owned()),
                entity_type: Some("group".to_owned()),
                parent_task_id: Some(parent_task_id),
            },
        )
        .await
    }

    async fn enqueue(
        &self,
        task_type: &str,
        group_id: &str,
        payload: serde_json::Value,
        correlation: Correlation,
    ) -> Result<TaskId, OrchestratorError> {
        let id = TaskId::new();

        let task = self
            .journal
            .create(CreateTaskParams {
                id,
                group_id: group_id.to_owned(),
                task_type: task_type.to_owned(),
                payload: payload.clone(),
                entity_id: correlation.entity_id,
                entity_type: correlation.entity_type,
                parent_task_id: correlation.parent_task_id,
            })
            .await?;

        let envelope = Envelope::new(&id.to_string(), group_id, task_type, payload);

        if let Err(e) = self.queue.enqueue(group_id, &envelope).await {
            self.mark_enqueue_failure(&task, &e).await;
            return Err(OrchestratorError::Queue(e));
        }

        Ok(task.id)
    }

    async fn mark_enqueue_failure(&self, task: &crate::types::Task, cause: &QueueError) {
        let message = format!("queue store enqueue failed: {cause}");
        if let Err(journal_err) = self
            .journal
            .update_status(task.id, TaskStatus::Failed, None, Some(&message), false)
            .await
        {
            tracing::error!(
                task_id = %task.id,
                error = %journal_err,
                "failed to record enqueue failure in journal"
            );
        }
    }
}
