//! Task Journal (C1): the durable row-per-task source of truth.
//!
//! Backed by Postgres via `sqlx`. The table is strictly append-structured
//! per row — only `status` and the related timestamp columns ever mutate
//! after creation, matching `spec.md` §4.1's contract.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::errors::JournalError;
use crate::types::{Task, TaskId, TaskStats, TaskStatus};

/// Handle onto the `task_logs` table.
#[derive(Clone)]
pub struct TaskJournal {
    pool: PgPool,
}

/// Fields accepted by [`TaskJournal::create`].
pub struct CreateTaskParams {
    /// See [`Task::id`].
    pub id: TaskId,
    /// See [`Task::group_id`].
    pub group_id: String,
    /// See [`Task::task_type`].
    pub task_type: String,
    /// See [`Task::payload`].
    pub payload: serde_json::Value,
    /// See [`Task::entity_id`].
    pub entity_id: Option<String>,
    /// See [`Task::entity_type`].
    pub entity_type: Option<String>,
    /// See [`Task::parent_task_id`].
    pub parent_task_id: Option<TaskId>,
}

impl TaskJournal {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the connection or migration
    /// fails.
    pub async fn connect(database_url: &str) -> Result<Self, JournalError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| JournalError::Database(e.to_string()))?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| JournalError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// Insert a new row in PENDING status with `created_at = now`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the insert fails.
    pub async fn create(&self, params: CreateTaskParams) -> Result<Task, JournalError> {
        let now = Utc::now();
        sqlx::query!(
            r#"
            INSERT INTO task_logs
                (id, group_id, task_type, status, payload, entity_id, entity_type,
                 parent_task_id, retry_count, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, $9)
            "#,
            params.id.0,
            params.group_id,
            params.task_type,
            TaskStatus::Pending.as_str(),
            params.payload,
            params.entity_id,
            params.entity_type,
            params.parent_task_id.map(|t| t.0),
            now,
        )
        .execute(&self.pool)
        .await?;

        Ok(Task {
            id: params.id,
            group_id: params.group_id,
            task_type: params.task_type,
            status: TaskStatus::Pending,
            payload: params.payload,
            entity_id: params.entity_id,
            entity_type: params.entity_type,
            parent_task_id: params.parent_task_id,
            worker_id: None,
            retry_count: 0,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            stopped_at: None,
        })
    }

    /// Transition `id` to `status`.
    ///
    /// Setting COMPLETED or FAILED also sets `completed_at = now`; setting
    /// PROCESSING also sets `started_at = now` and `worker_id`; setting
    /// STOPPED also sets `stopped_at = now`. Idempotent when called
    /// repeatedly with the same status (the timestamp columns are only ever
    /// set, never reset, by re-application).
    ///
    /// `retry_increment` is honored only by [`crate::recovery`] and the
    /// `retry` control operation, per invariant 4: `retry_count` is
    /// monotonic and Recovery/retry are its only producers.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the update fails, or
    /// [`JournalError::NotFound`] if `id` does not exist.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        worker_id: Option<&str>,
        error_message: Option<&str>,
        retry_increment: bool,
    ) -> Result<(), JournalError> {
        let now = Utc::now();
        let retry_delta = i32::from(retry_increment);

        let started_at = matches!(status, TaskStatus::Processing).then_some(now);
        let completed_at =
            matches!(status, TaskStatus::Completed | TaskStatus::Failed).then_some(now);
        let stopped_at = matches!(status, TaskStatus::Stopped).then_some(now);

        let result = sqlx::query!(
            r#"
            UPDATE task_logs
            SET status = $2,
                worker_id = COALESCE($3, worker_id),
                error_message = $4,
                retry_count = retry_count + $5,
                started_at = COALESCE(started_at, $6),
                completed_at = COALESCE(completed_at, $7),
                stopped_at = COALESCE(stopped_at, $8)
            WHERE id = $1
            "#,
            id.0,
            status.as_str(),
            worker_id,
            error_message,
            retry_delta,
            started_at,
            completed_at,
            stopped_at,
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(id));
        }
        Ok(())
    }

    /// Reset a FAILED/STOPPED/PENDING task back to PENDING for a retry:
    /// clears `error_message`/`started_at`/`completed_at`/`stopped_at`,
    /// increments `retry_count`. Does not touch the Queue Store; see
    /// [`crate::control::retry`].
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotFound`] if `id` does not exist.
    pub async fn reset_for_retry(&self, id: TaskId) -> Result<(), JournalError> {
        let result = sqlx::query!(
            r#"
            UPDATE task_logs
            SET status = $2,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL,
                stopped_at = NULL,
                retry_count = retry_count + 1
            WHERE id = $1
            "#,
            id.0,
            TaskStatus::Pending.as_str(),
        )
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(JournalError::NotFound(id));
        }
        Ok(())
    }

    /// Look up a single row.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotFound`] if `id` does not exist.
    pub async fn find_by_id(&self, id: TaskId) -> Result<Task, JournalError> {
        let row = sqlx::query_as!(
            TaskRow,
            r#"SELECT id, group_id, task_type, status, payload, entity_id, entity_type,
                      parent_task_id, worker_id, retry_count, error_message,
                      created_at, started_at, completed_at, stopped_at
               FROM task_logs WHERE id = $1"#,
            id.0,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or(JournalError::NotFound(id))?;

        row.try_into()
    }

    /// Page through a group's tasks, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the query fails.
    pub async fn list_by_group(
        &self,
        group_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Task>, JournalError> {
        let rows = sqlx::query_as!(
            TaskRow,
            r#"SELECT id, group_id, task_type, status, payload, entity_id, entity_type,
                      parent_task_id, worker_id, retry_count, error_message,
                      created_at, started_at, completed_at, stopped_at
               FROM task_logs
               WHERE group_id = $1
               ORDER BY created_at DESC
               LIMIT $2 OFFSET $3"#,
            group_id,
            limit,
            offset,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// List tasks currently in `status`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the query fails.
    pub async fn list_by_status(
        &self,
        status: TaskStatus,
        limit: i64,
    ) -> Result<Vec<Task>, JournalError> {
        let rows = sqlx::query_as!(
            TaskRow,
            r#"SELECT id, group_id, task_type, status, payload, entity_id, entity_type,
                      parent_task_id, worker_id, retry_count, error_message,
                      created_at, started_at, completed_at, stopped_at
               FROM task_logs
               WHERE status = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
            status.as_str(),
            limit,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Most recently created tasks across all groups.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the query fails.
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<Task>, JournalError> {
        let rows = sqlx::query_as!(
            TaskRow,
            r#"SELECT id, group_id, task_type, status, payload, entity_id, entity_type,
                      parent_task_id, worker_id, retry_count, error_message,
                      created_at, started_at, completed_at, stopped_at
               FROM task_logs
               ORDER BY created_at DESC
               LIMIT $1"#,
            limit,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Per-status counts and mean completion latency for tasks created
    /// since `since`.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Database`] if the query fails.
    pub async fn stats(&self, since: DateTime<Utc>) -> Result<TaskStats, JournalError> {
        let row = sqlx::query!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING') AS "pending!",
                COUNT(*) FILTER (WHERE status = 'PROCESSING') AS "processing!",
                COUNT(*) FILTER (WHERE status = 'COMPLETED') AS "completed!",
                COUNT(*) FILTER (WHERE status = 'FAILED') AS "failed!",
                COUNT(*) FILTER (WHERE status = 'STOPPED') AS "stopped!",
                AVG(EXTRACT(EPOCH FROM (completed_at - started_at)))
                    FILTER (WHERE completed_at IS NOT NULL AND started_at IS NOT NULL)
                    AS mean_duration_seconds
            FROM task_logs
            WHERE created_at >= $1
            "#,
            since,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(TaskStats {
            pending: row.pending,
            processing: row.processing,
            completed: row.completed,
            failed: row.failed,
            stopped: row.stopped,
            mean_duration_seconds: row.mean_duration_seconds,
        })
    }
}

struct TaskRow {
    id: uuid::Uuid,
    group_id: String,
    task_type: String,
    status: String,
    payload: serde_json::Value,
    entity_id: Option<String>,
    entity_type: Option<String>,
    parent_task_id: Option<uuid::Uuid>,
    worker_id: Option<String>,
    retry_count: i32,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = JournalError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TaskId(row.id),
            group_id: row.group_id,
            task_type: row.task_type,
            status: row.status.parse()?,
            payload: row.payload,
            entity_id: row.entity_id,
            entity_type: row.entity_type,
            parent_task_id: row.parent_task_id.map(TaskId),
            worker_id: row.worker_id,
            retry_count: row.retry_count,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            stopped_at: row.stopped_at,
        })
    }
}
