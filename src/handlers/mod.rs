//! Handler Contracts (C8): the four graph-maintenance operations the
//! Worker Pool invokes, `spec.md` §4.8.
//!
//! These are orchestration-level contracts; the graph engine's internal
//! algorithms (entity extraction, community detection, similarity scoring)
//! are external per `spec.md` §1 and reached only through
//! [`crate::graph::GraphEngine`].

pub mod communities;
pub mod dedup;
pub mod ingest;
pub mod refresh;

pub use communities::RebuildCommunitiesHandler;
pub use dedup::DeduplicateEntitiesHandler;
pub use ingest::AddEpisodeHandler;
pub use refresh::IncrementalRefreshHandler;

/// Read a required string field out of a handler payload.
fn required_str<'a>(
    payload: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, crate::errors::HandlerError> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| {
            crate::errors::HandlerError::InvalidInput(format!("missing or non-string `{field}`"))
        })
}

fn optional_str(payload: &serde_json::Value, field: &str) -> Option<String> {
    payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
}
