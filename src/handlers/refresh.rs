//! Incremental Refresh handler (`kind = "incremental_refresh"`,
//! `spec.md` §4.8.4).
//!
//! Grounded on `examples/original_source/.../incremental_refresh.py`'s
//! `IncrementalRefreshHandler`: resolve the target episode set (explicit
//! uuids, or the group's most recent window), force-reprocess each one
//! through the graph engine, then optionally chain a child
//! `rebuild_communities` task so the group's clustering reflects the
//! refreshed entities. Per-episode failures are isolated the same way
//! `deduplicate_entities` isolates per-pair failures, so one bad episode
//! does not abort the rest of the window.

use async_trait::async_trait;

use super::{optional_str, required_str};
use crate::errors::HandlerError;
use crate::producer::INCREMENTAL_REFRESH_DEFAULT_WINDOW;
use crate::registry::{Handler, HandlerContext};

/// Forces reprocessing of a group's recent (or explicitly listed) episodes.
pub struct IncrementalRefreshHandler;

#[async_trait]
impl Handler for IncrementalRefreshHandler {
    fn kind(&self) -> &str {
        "incremental_refresh"
    }

    fn timeout_seconds(&self) -> u64 {
        3600
    }

    async fn process(
        &self,
        payload: &serde_json::Value,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let group_id = required_str(payload, "group_id")?;
        let tenant_id = optional_str(payload, "tenant_id");
        let project_id = optional_str(payload, "project_id");
        let user_id = optional_str(payload, "user_id");
        let rebuild_communities = payload
            .get("rebuild_communities")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let explicit_uuids: Vec<String> = payload
            .get("episode_uuids")
            .and_then(serde_json::Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                    .collect()
            })
            .unwrap_or_default();

        let episode_uuids = if explicit_uuids.is_empty() {
            ctx.graph
                .recent_episodes(group_id, INCREMENTAL_REFRESH_DEFAULT_WINDOW)
                .await?
                .into_iter()
                .map(|e| e.uuid)
                .collect()
        } else {
            explicit_uuids
        };

        let mut refreshed = 0usize;
        for episode_uuid in &episode_uuids {
            if let Err(e) = refresh_one(
                ctx,
                episode_uuid,
                tenant_id.as_deref(),
                project_id.as_deref(),
                user_id.as_deref(),
            )
            .await
            {
                tracing::warn!(
                    group_id,
                    episode_uuid,
                    error = %e,
                    "incremental_refresh: failed to refresh episode, continuing"
                );
                continue;
            }
            refreshed = refreshed.saturating_add(1);
        }

        tracing::info!(
            group_id,
            requested = episode_uuids.len(),
            refreshed,
            "incremental_refresh: window processed"
        );

        if rebuild_communities {
            ctx.producer
                .enqueue_child_rebuild_communities(group_id, ctx.task_id)
                .await
                .map_err(|e| HandlerError::Execution(e.to_string()))?;
        }

        Ok(())
    }
}

async fn refresh_one(
    ctx: &HandlerContext,
    episode_uuid: &str,
    tenant_id: Option<&str>,
    project_id: Option<&str>,
    user_id: Option<&str>,
) -> Result<(), HandlerError> {
    ctx.graph.reprocess_episode(episode_uuid).await?;
    ctx.graph
        .propagate_episode_attributes(episode_uuid, tenant_id, project_id, user_id)
        .await
}
