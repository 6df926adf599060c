//! Queue Store (C2): the ephemeral per-group FIFO list, the active-groups
//! set, the global in-flight list, and the per-group locks.
//!
//! [`QueueStore`] is a trait rather than a concrete type so the rest of the
//! orchestrator (Producer, Worker Pool, Recovery, Control Operations) can be
//! exercised against [`InMemoryQueueStore`] in tests, matching
//! `SPEC_FULL.md` §2 A5's "in-memory/fake Queue Store" test-tooling note —
//! the same seam shape as [`crate::graph::GraphEngine`]. [`RedisQueueStore`]
//! is the real implementation, backed by the `redis` crate against the wire
//! layout fixed in `spec.md` §6. Wire layout is reproduced verbatim so an
//! operator can inspect the store with `redis-cli` during an incident, and
//! grounded on `examples/original_source/.../redis_queue.py`'s key naming
//! (`queue:group:<G>`, `queue:active_groups`, `queue:processing:global`,
//! `lock:queue:group:<G>`) and its `rpoplpush`/`lrem`/`lpush` move
//! semantics.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::errors::QueueError;

/// The reserved global in-flight list. A single list serves every group;
/// membership, not a per-group list, is what Recovery scans.
const PROCESSING_KEY: &str = "queue:processing:global";

/// The set of group ids with a non-empty `group:<G>` list.
const ACTIVE_GROUPS_KEY: &str = "queue:active_groups";

fn group_key(group_id: &str) -> String {
    format!("queue:group:{group_id}")
}

fn lock_key(group_id: &str) -> String {
    format!("lock:queue:group:{group_id}")
}

/// A JSON-serialized unit of queued work. Opaque to the orchestrator except
/// for the fields read by [`QueueStore`] and [`crate::recovery`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Matches the owning [`crate::types::Task::id`].
    pub task_id: String,
    /// Matches the owning [`crate::types::Task::group_id`].
    pub group_id: String,
    /// Matches the owning [`crate::types::Task::task_type`].
    pub task_type: String,
    /// Writer's clock at enqueue/requeue time, seconds since epoch. Read
    /// only by Recovery, to measure age.
    #[serde(default)]
    pub timestamp: i64,
    /// Handler-specific fields, merged in verbatim.
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

impl Envelope {
    /// Build an envelope with `timestamp = now`.
    #[must_use]
    pub fn new(task_id: &str, group_id: &str, task_type: &str, fields: serde_json::Value) -> Self {
        Self {
            task_id: task_id.to_owned(),
            group_id: group_id.to_owned(),
            task_type: task_type.to_owned(),
            timestamp: Utc::now().timestamp(),
            fields,
        }
    }

    fn to_json(&self) -> Result<String, QueueError> {
        Ok(serde_json::to_string(self)?)
    }

    fn from_json(raw: &str) -> Result<Self, QueueError> {
        serde_json::from_str(raw).map_err(QueueError::from)
    }
}

/// The Queue Store's operations, `spec.md` §4.2.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Append `envelope` to `group:<G>` and add `G` to `active-groups`.
    /// Atomic across both writes.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store write fails.
    async fn enqueue(&self, group_id: &str, envelope: &Envelope) -> Result<(), QueueError>;

    /// Atomically move the tail envelope of `group:<G>` to `processing`,
    /// preserving FIFO order; `None` if the group queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails or the moved value is
    /// not valid envelope JSON.
    async fn pop_one_to_processing(
        &self,
        group_id: &str,
    ) -> Result<Option<Envelope>, QueueError>;

    /// Remove the first matching copy of `envelope` from `processing`.
    /// A no-op if it is not present — the benign duplicate-ack case
    /// described in `spec.md` §5.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn ack_processed(&self, envelope: &Envelope) -> Result<(), QueueError>;

    /// Remove `envelope` from `processing`, refresh its `timestamp` to
    /// `new_timestamp`, and prepend it to its group's queue (head-insertion,
    /// giving it scheduling priority).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store write fails.
    async fn requeue_from_processing(
        &self,
        envelope: &Envelope,
        new_timestamp: i64,
    ) -> Result<(), QueueError>;

    /// `true` if `group:<G>` has no pending envelopes.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn is_group_empty(&self, group_id: &str) -> Result<bool, QueueError>;

    /// Remove `group_id` from `active-groups`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn remove_active_group(&self, group_id: &str) -> Result<(), QueueError>;

    /// Attempt to acquire `group_id`'s lock for `worker_id`, with a TTL of
    /// `ttl_seconds`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn try_acquire_group_lock(
        &self,
        group_id: &str,
        worker_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, QueueError>;

    /// Release `group_id`'s lock, but only if it is currently held by
    /// `worker_id`. A no-op, not an error, if the lock is absent or owned by
    /// someone else.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn release_group_lock(&self, group_id: &str, worker_id: &str)
        -> Result<(), QueueError>;

    /// Best-effort random sample of up to `k` active groups.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn sample_active_groups(&self, k: usize) -> Result<Vec<String>, QueueError>;

    /// Current depth of `group:<G>`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails.
    async fn group_queue_depth(&self, group_id: &str) -> Result<i64, QueueError>;

    /// Snapshot of the entire `processing` list, for Recovery and for the
    /// in-flight check in [`crate::control::Controller::retry`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the store call fails or any entry is not
    /// valid envelope JSON.
    async fn snapshot_processing(&self) -> Result<Vec<Envelope>, QueueError>;
}

/// Redis-backed [`QueueStore`], the production implementation.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
}

impl RedisQueueStore {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Store`] if the connection cannot be
    /// established.
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn enqueue(&self, group_id: &str, envelope: &Envelope) -> Result<(), QueueError> {
        let raw = envelope.to_json()?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lpush(group_key(group_id), &raw)
            .sadd(ACTIVE_GROUPS_KEY, group_id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_one_to_processing(
        &self,
        group_id: &str,
    ) -> Result<Option<Envelope>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .rpoplpush(group_key(group_id), PROCESSING_KEY)
            .await?;
        raw.map(|r| Envelope::from_json(&r)).transpose()
    }

    async fn ack_processed(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let raw = envelope.to_json()?;
        let mut conn = self.conn.clone();
        let _: i64 = conn.lrem(PROCESSING_KEY, 1, &raw).await?;
        Ok(())
    }

    async fn requeue_from_processing(
        &self,
        envelope: &Envelope,
        new_timestamp: i64,
    ) -> Result<(), QueueError> {
        let old_raw = envelope.to_json()?;
        let mut refreshed = envelope.clone();
        refreshed.timestamp = new_timestamp;
        let new_raw = refreshed.to_json()?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .lrem(PROCESSING_KEY, 1, &old_raw)
            .rpush(group_key(&envelope.group_id), &new_raw)
            .sadd(ACTIVE_GROUPS_KEY, &envelope.group_id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn is_group_empty(&self, group_id: &str) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(group_key(group_id)).await?;
        Ok(len == 0)
    }

    async fn remove_active_group(&self, group_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(ACTIVE_GROUPS_KEY, group_id).await?;
        Ok(())
    }

    async fn try_acquire_group_lock(
        &self,
        group_id: &str,
        worker_id: &str,
        ttl_seconds: u64,
    ) -> Result<bool, QueueError> {
        let mut conn = self.conn.clone();
        let acquired: bool = redis::cmd("SET")
            .arg(lock_key(group_id))
            .arg(worker_id)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        Ok(acquired)
    }

    async fn release_group_lock(
        &self,
        group_id: &str,
        worker_id: &str,
    ) -> Result<(), QueueError> {
        // Check-then-delete rather than a Lua script: the spec only requires
        // owner-checked release, and the lock's own TTL already bounds the
        // damage of a lost race between this check and an expiry-triggered
        // reacquisition by another worker.
        let mut conn = self.conn.clone();
        let held_by: Option<String> = conn.get(lock_key(group_id)).await?;
        if held_by.as_deref() == Some(worker_id) {
            let _: i64 = conn.del(lock_key(group_id)).await?;
        }
        Ok(())
    }

    async fn sample_active_groups(&self, k: usize) -> Result<Vec<String>, QueueError> {
        let mut conn = self.conn.clone();
        let groups: Vec<String> = conn.srandmember_multiple(ACTIVE_GROUPS_KEY, k).await?;
        Ok(groups)
    }

    async fn group_queue_depth(&self, group_id: &str) -> Result<i64, QueueError> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(group_key(group_id)).await?;
        Ok(len)
    }

    async fn snapshot_processing(&self) -> Result<Vec<Envelope>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(PROCESSING_KEY, 0, -1).await?;
        raw.iter().map(|r| Envelope::from_json(r)).collect()
    }
}

#[derive(Default)]
struct InMemoryState {
    groups: HashMap<String, VecDeque<Envelope>>,
    active_groups: HashSet<String>,
    processing: Vec<Envelope>,
    locks: HashMap<String, String>,
}

/// In-process fake [`QueueStore`] used by unit and integration tests
/// (`SPEC_FULL.md` §2 A5). Lock TTLs are not enforced — tests that need
/// TTL-expiry behavior (S3's recovery scenario) exercise that through
/// [`crate::recovery`] directly rather than through lock expiry, since a
/// single-process fake has no independent clock to expire against.
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryQueueStore {
    /// An empty fake store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, group_id: &str, envelope: &Envelope) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        state
            .groups
            .entry(group_id.to_owned())
            .or_default()
            .push_back(envelope.clone());
        state.active_groups.insert(group_id.to_owned());
        Ok(())
    }

    async fn pop_one_to_processing(
        &self,
        group_id: &str,
    ) -> Result<Option<Envelope>, QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        let popped = state
            .groups
            .get_mut(group_id)
            .and_then(VecDeque::pop_front);
        if let Some(envelope) = &popped {
            state.processing.push(envelope.clone());
        }
        Ok(popped)
    }

    async fn ack_processed(&self, envelope: &Envelope) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        if let Some(pos) = state
            .processing
            .iter()
            .position(|e| e.task_id == envelope.task_id)
        {
            state.processing.remove(pos);
        }
        Ok(())
    }

    async fn requeue_from_processing(
        &self,
        envelope: &Envelope,
        new_timestamp: i64,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        if let Some(pos) = state
            .processing
            .iter()
            .position(|e| e.task_id == envelope.task_id)
        {
            state.processing.remove(pos);
        }
        let mut refreshed = envelope.clone();
        refreshed.timestamp = new_timestamp;
        state
            .groups
            .entry(envelope.group_id.clone())
            .or_default()
            .push_front(refreshed);
        state.active_groups.insert(envelope.group_id.clone());
        Ok(())
    }

    async fn is_group_empty(&self, group_id: &str) -> Result<bool, QueueError> {
        let state = self.state.lock().expect("in-memory queue mutex poisoned");
        Ok(state
            .groups
            .get(group_id)
            .is_none_or(VecDeque::is_empty))
    }

    async fn remove_active_group(&self, group_id: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        state.active_groups.remove(group_id);
        Ok(())
    }

    async fn try_acquire_group_lock(
        &self,
        group_id: &str,
        worker_id: &str,
        _ttl_seconds: u64,
    ) -> Result<bool, QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        if state.locks.contains_key(group_id) {
            return Ok(false);
        }
        state.locks.insert(group_id.to_owned(), worker_id.to_owned());
        Ok(true)
    }

    async fn release_group_lock(
        &self,
        group_id: &str,
        worker_id: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("in-memory queue mutex poisoned");
        if state.locks.get(group_id).map(String::as_str) == Some(worker_id) {
            state.locks.remove(group_id);
        }
        Ok(())
    }

    async fn sample_active_groups(&self, k: usize) -> Result<Vec<String>, QueueError> {
        let state = self.state.lock().expect("in-memory queue mutex poisoned");
        let mut groups: Vec<String> = state.active_groups.iter().cloned().collect();
        groups.shuffle(&mut rand::thread_rng());
        groups.truncate(k);
        Ok(groups)
    }

    async fn group_queue_depth(&self, group_id: &str) -> Result<i64, QueueError> {
        let state = self.state.lock().expect("in-memory queue mutex poisoned");
        let len = state.groups.get(group_id).map_or(0, VecDeque::len);
        Ok(i64::try_from(len).unwrap_or(i64::MAX))
    }

    async fn snapshot_processing(&self) -> Result<Vec<Envelope>, QueueError> {
        let state = self.state.lock().expect("in-memory queue mutex poisoned");
        Ok(state.processing.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new(
            "task-1",
            "group-a",
            "add_episode",
            serde_json::json!({"name": "ep1"}),
        );
        let raw = env.to_json().unwrap();
        let back = Envelope::from_json(&raw).unwrap();
        assert_eq!(back.task_id, "task-1");
        assert_eq!(back.group_id, "group-a");
        assert_eq!(back.task_type, "add_episode");
        assert_eq!(back.fields["name"], "ep1");
    }

    #[test]
    fn key_helpers_match_the_documented_wire_layout() {
        assert_eq!(group_key("g1"), "queue:group:g1");
        assert_eq!(lock_key("g1"), "lock:queue:group:g1");
        assert_eq!(PROCESSING_KEY, "queue:processing:global");
        assert_eq!(ACTIVE_GROUPS_KEY, "queue:active_groups");
    }

    #[tokio::test]
    async fn in_memory_store_preserves_fifo_order_within_a_group() {
        let store = InMemoryQueueStore::new();
        for name in ["a", "b", "c"] {
            store
                .enqueue("g1", &Envelope::new(name, "g1", "kind", serde_json::json!({})))
                .await
                .unwrap();
        }

        let first = store.pop_one_to_processing("g1").await.unwrap().unwrap();
        let second = store.pop_one_to_processing("g1").await.unwrap().unwrap();
        let third = store.pop_one_to_processing("g1").await.unwrap().unwrap();

        assert_eq!(first.task_id, "a");
        assert_eq!(second.task_id, "b");
        assert_eq!(third.task_id, "c");
    }

    #[tokio::test]
    async fn in_memory_store_lock_is_exclusive() {
        let store = InMemoryQueueStore::new();
        assert!(store
            .try_acquire_group_lock("g1", "worker-a", 60)
            .await
            .unwrap());
        assert!(!store
            .try_acquire_group_lock("g1", "worker-b", 60)
            .await
            .unwrap());

        store.release_group_lock("g1", "worker-a").await.unwrap();
        assert!(store
            .try_acquire_group_lock("g1", "worker-b", 60)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn requeue_head_inserts_ahead_of_normally_enqueued_work() {
        let store = InMemoryQueueStore::new();
        store
            .enqueue(
                "g1",
                &Envelope::new("normal", "g1", "kind", serde_json::json!({})),
            )
            .await
            .unwrap();

        let stalled = Envelope::new("stalled", "g1", "kind", serde_json::json!({}));
        store.requeue_from_processing(&stalled, 123).await.unwrap();

        let first = store.pop_one_to_processing("g1").await.unwrap().unwrap();
        assert_eq!(first.task_id, "stalled");
        assert_eq!(first.timestamp, 123);
    }
}
