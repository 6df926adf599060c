//! The HTTP producer surface: one route per enqueue operation plus the
//! read-only status/control routes.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use taskyard::producer::{Correlation, DeduplicateParams, EpisodeFields, IncrementalRefreshParams};
use taskyard::types::{Task, TaskId};

use crate::error::ApiError;
use crate::state::AppState;

/// Assemble the full router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tasks/episodes", post(enqueue_episode))
        .route("/tasks/rebuild-communities", post(enqueue_rebuild_communities))
        .route("/tasks/deduplicate", post(enqueue_deduplicate))
        .route("/tasks/incremental-refresh", post(enqueue_incremental_refresh))
        .route("/tasks/:id/retry", post(retry_task))
        .route("/tasks/:id/stop", post(stop_task))
        .route("/tasks/:id", get(get_task))
        .route("/tasks", get(list_tasks))
        .route("/groups/:group/queue-depth", get(group_queue_depth))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct EnqueueEpisodeRequest {
    group_id: String,
    episode_id: String,
    name: String,
    content: String,
    source_description: String,
    source_kind: String,
    tenant_id: Option<String>,
    project_id: Option<String>,
    user_id: Option<String>,
    entity_id: Option<String>,
    entity_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    task_id: TaskId,
}

async fn enqueue_episode(
    State(state): State<AppState>,
    Json(req): Json<EnqueueEpisodeRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = state
        .producer
        .enqueue_episode(
            &req.group_id,
            EpisodeFields {
                episode_id: req.episode_id,
                name: req.name,
                content: req.content,
                source_description: req.source_description,
                source_kind: req.source_kind,
                tenant_id: req.tenant_id,
                project_id: req.project_id,
                user_id: req.user_id,
            },
            Correlation {
                entity_id: req.entity_id,
                entity_type: req.entity_type,
                parent_task_id: None,
            },
        )
        .await?;
    Ok(Json(EnqueueResponse { task_id }))
}

#[derive(Debug, Deserialize)]
struct RebuildCommunitiesRequest {
    group_id: String,
}

async fn enqueue_rebuild_communities(
    State(state): State<AppState>,
    Json(req): Json<RebuildCommunitiesRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = state
        .producer
        .enqueue_rebuild_communities(&req.group_id)
        .await?;
    Ok(Json(EnqueueResponse { task_id }))
}

#[derive(Debug, Deserialize)]
struct DeduplicateRequest {
    group_id: String,
    similarity_threshold: f64,
    #[serde(default)]
    dry_run: bool,
    project_id: Option<String>,
}

async fn enqueue_deduplicate(
    State(state): State<AppState>,
    Json(req): Json<DeduplicateRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = state
        .producer
        .enqueue_deduplicate(DeduplicateParams {
            group_id: req.group_id,
            similarity_threshold: req.similarity_threshold,
            dry_run: req.dry_run,
            project_id: req.project_id,
        })
        .await?;
    Ok(Json(EnqueueResponse { task_id }))
}

#[derive(Debug, Deserialize)]
struct IncrementalRefreshRequest {
    group_id: String,
    #[serde(default)]
    episode_uuids: Vec<String>,
    #[serde(default)]
    rebuild_communities: bool,
    project_id: Option<String>,
    tenant_id: Option<String>,
    user_id: Option<String>,
}

async fn enqueue_incremental_refresh(
    State(state): State<AppState>,
    Json(req): Json<IncrementalRefreshRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = state
        .producer
        .enqueue_incremental_refresh(IncrementalRefreshParams {
            group_id: req.group_id,
            episode_uuids: req.episode_uuids,
            rebuild_communities: req.rebuild_communities,
            project_id: req.project_id,
            tenant_id: req.tenant_id,
            user_id: req.user_id,
        })
        .await?;
    Ok(Json(EnqueueResponse { task_id }))
}

async fn retry_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.controller.retry(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<StatusCode, ApiError> {
    state.controller.stop(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, ApiError> {
    let task = state.controller.status(id).await?;
    Ok(Json(task))
}

#[derive(Debug, Deserialize)]
struct ListTasksQuery {
    group: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<ListTasksQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let limit = params.limit.unwrap_or(50);
    let tasks = match params.group {
        Some(group_id) => {
            state
                .controller
                .list_by_group(&group_id, limit, params.offset.unwrap_or(0))
                .await?
        }
        None => state.controller.list_recent(limit).await?,
    };
    Ok(Json(tasks))
}

async fn group_queue_depth(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Result<Json<HashMap<&'static str, i64>>, ApiError> {
    let depth = state.controller.list_group_queue_depth(&group).await?;
    let mut body = HashMap::new();
    body.insert("depth", depth);
    Ok(Json(body))
}
