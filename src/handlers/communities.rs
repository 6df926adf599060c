//! Rebuild Communities handler (`kind = "rebuild_communities"`,
//! `spec.md` §4.8.2).
//!
//! Grounded on `examples/original_source/.../community.py`'s
//! `CommunityTaskHandler.handle`: delete the group's existing communities,
//! then rebuild from scratch, rather than diffing — simpler and, per the
//! source's own comment, cheap enough at the group's scale to redo in full
//! every time.

use async_trait::async_trait;

use super::required_str;
use crate::errors::HandlerError;
use crate::registry::{Handler, HandlerContext};

/// Drops and rebuilds a group's community clustering.
pub struct RebuildCommunitiesHandler;

#[async_trait]
impl Handler for RebuildCommunitiesHandler {
    fn kind(&self) -> &str {
        "rebuild_communities"
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

        // SPEC_FULL.md §9 Open Question 3: the magic `"global"` value
        // meaning "every group" is rejected here too, not just at Producer
        // time, since a stale or hand-crafted envelope could carry it.
        if group_id.is_empty() || group_id.eq_ignore_ascii_case("global") {
            return Err(HandlerError::InvalidInput(
                "rebuild_communities requires an explicit, non-empty groupId".to_owned(),
            ));
        }

        ctx.graph.remove_communities(group_id).await?;
        let rebuilt = ctx.graph.build_communities(group_id).await?;

        tracing::info!(
            group_id,
            community_count = rebuilt.len(),
            "rebuilt communities for group"
        );

        Ok(())
    }
}
