//! Sync queue repository implementation
//!
//! The queue store exclusively owns `sync_tasks` rows. All state
//! transitions are conditional updates keyed by task id (`WHERE state =
//! 'pending'`), so a task can never be completed or failed twice even if a
//! second worker is pointed at the same database.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{AppointmentId, QueueStats, RetryPolicy, SyncTask, TaskId, TaskState};
use libsql::Connection;

const TASK_COLUMNS: &str = "id, appointment_id, payload, state, attempt_count, \
                            next_eligible_at, last_attempt_at, last_error, created_at, synced_at";

/// Trait for sync queue storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncQueueRepository {
    /// Persist a new pending task; the only way tasks enter the queue.
    ///
    /// Blocks only on the local durable write. A downstream outage can
    /// never fail an enqueue.
    async fn enqueue(&self, appointment_id: &AppointmentId, payload: &[u8]) -> Result<TaskId>;

    /// Fetch a task by id
    async fn get(&self, id: TaskId) -> Result<Option<SyncTask>>;

    /// Claim up to `limit` pending tasks eligible at `now_ms`, FIFO by
    /// creation time
    async fn claim_batch(&self, limit: usize, now_ms: i64) -> Result<Vec<SyncTask>>;

    /// Transition a pending task to `Synced`.
    ///
    /// Returns `false` when the task was no longer pending (already
    /// completed, failed, or reset by another writer).
    async fn mark_synced(&self, id: TaskId, synced_at: i64) -> Result<bool>;

    /// Record a failed attempt, transitioning to `Failed` once the
    /// policy's attempt limit is reached.
    ///
    /// Returns the state the task ended up in.
    async fn record_failure(
        &self,
        id: TaskId,
        error: &str,
        now_ms: i64,
        policy: &RetryPolicy,
    ) -> Result<TaskState>;

    /// List failed tasks, oldest first
    async fn list_failed(&self, limit: usize) -> Result<Vec<SyncTask>>;

    /// Aggregate counts by state
    async fn stats(&self) -> Result<QueueStats>;

    /// Re-admit every failed task to pending, clearing attempt counts and
    /// errors. Returns the number of tasks reset; zero is a no-op, not an
    /// error.
    async fn retry_failed(&self) -> Result<u64>;
}

/// libSQL implementation of `SyncQueueRepository`
pub struct LibSqlSyncQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a task from a database row
    fn parse_task(row: &libsql::Row) -> Result<SyncTask> {
        let state: String = row.get(3)?;
        let state = state
            .parse::<TaskState>()
            .map_err(Error::Storage)?;

        let attempt_count: i64 = row.get(4)?;
        let attempt_count = u32::try_from(attempt_count)
            .map_err(|_| Error::Storage(format!("invalid attempt count: {attempt_count}")))?;

        Ok(SyncTask {
            id: TaskId::new(row.get(0)?),
            appointment_id: row.get(1)?,
            payload: row.get(2)?,
            state,
            attempt_count,
            next_eligible_at: row.get(5)?,
            last_attempt_at: row.get(6)?,
            last_error: row.get(7)?,
            created_at: row.get(8)?,
            synced_at: row.get(9)?,
        })
    }

    async fn query_tasks(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<SyncTask>> {
        let mut rows = self.conn.query(sql, params).await?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next().await? {
            tasks.push(Self::parse_task(&row)?);
        }
        Ok(tasks)
    }

    async fn count_where(&self, predicate: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM sync_tasks WHERE {predicate}");
        let mut rows = self.conn.query(&sql, ()).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        u64::try_from(count).map_err(|_| Error::Storage("negative task count".to_string()))
    }
}

impl SyncQueueRepository for LibSqlSyncQueueRepository<'_> {
    async fn enqueue(&self, appointment_id: &AppointmentId, payload: &[u8]) -> Result<TaskId> {
        let created_at = chrono::Utc::now().timestamp_millis();

        self.conn
            .execute(
                "INSERT INTO sync_tasks (appointment_id, payload, state, attempt_count,
                                         next_eligible_at, created_at)
                 VALUES (?, ?, 'pending', 0, 0, ?)",
                libsql::params![appointment_id.as_str(), payload.to_vec(), created_at],
            )
            .await?;

        let id = TaskId::new(self.conn.last_insert_rowid());
        tracing::debug!("Enqueued sync task {id} for appointment {appointment_id}");
        Ok(id)
    }

    async fn get(&self, id: TaskId) -> Result<Option<SyncTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM sync_tasks WHERE id = ?");
        let tasks = self.query_tasks(&sql, libsql::params![id.value()]).await?;
        Ok(tasks.into_iter().next())
    }

    async fn claim_batch(&self, limit: usize, now_ms: i64) -> Result<Vec<SyncTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks
             WHERE state = 'pending' AND next_eligible_at <= ?
             ORDER BY created_at, id
             LIMIT ?"
        );
        self.query_tasks(&sql, libsql::params![now_ms, limit as i64])
            .await
    }

    async fn mark_synced(&self, id: TaskId, synced_at: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET state = 'synced', synced_at = ?, last_attempt_at = ?, last_error = NULL
                 WHERE id = ? AND state = 'pending'",
                libsql::params![synced_at, synced_at, id.value()],
            )
            .await?;

        Ok(changed == 1)
    }

    async fn record_failure(
        &self,
        id: TaskId,
        error: &str,
        now_ms: i64,
        policy: &RetryPolicy,
    ) -> Result<TaskState> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET attempt_count = attempt_count + 1, last_attempt_at = ?, last_error = ?
                 WHERE id = ? AND state = 'pending'",
                libsql::params![now_ms, error, id.value()],
            )
            .await?;

        if changed == 0 {
            // The task left `pending` under us; report its current state.
            let task = self.get(id).await?.ok_or(Error::TaskNotFound(id.value()))?;
            return Ok(task.state);
        }

        let task = self.get(id).await?.ok_or(Error::TaskNotFound(id.value()))?;

        if task.attempt_count >= policy.max_attempts {
            self.conn
                .execute(
                    "UPDATE sync_tasks SET state = 'failed'
                     WHERE id = ? AND state = 'pending'",
                    libsql::params![id.value()],
                )
                .await?;
            return Ok(TaskState::Failed);
        }

        let next_eligible_at = policy.next_eligible_at(task.attempt_count, now_ms);
        self.conn
            .execute(
                "UPDATE sync_tasks SET next_eligible_at = ?
                 WHERE id = ? AND state = 'pending'",
                libsql::params![next_eligible_at, id.value()],
            )
            .await?;

        Ok(TaskState::Pending)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<SyncTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM sync_tasks
             WHERE state = 'failed'
             ORDER BY created_at, id
             LIMIT ?"
        );
        self.query_tasks(&sql, libsql::params![limit as i64]).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        // Independent counts; an eventually-consistent snapshot is fine here.
        let pending = self.count_where("state = 'pending'").await?;
        let synced = self.count_where("state = 'synced'").await?;
        let failed = self.count_where("state = 'failed'").await?;

        Ok(QueueStats {
            pending,
            synced,
            failed,
            total: pending + synced + failed,
        })
    }

    async fn retry_failed(&self) -> Result<u64> {
        let reset = self
            .conn
            .execute(
                "UPDATE sync_tasks
                 SET state = 'pending', attempt_count = 0, last_error = NULL,
                     next_eligible_at = 0
                 WHERE state = 'failed'",
                (),
            )
            .await?;

        if reset > 0 {
            tracing::info!("Re-admitted {reset} failed sync tasks to pending");
        }
        Ok(reset)
    }
}
