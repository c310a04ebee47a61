//! Shared sync service wrapper used across operator surfaces.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::db::{
    AppointmentRepository, Database, LibSqlAppointmentRepository, LibSqlSyncQueueRepository,
    SyncQueueRepository,
};
use crate::models::{
    Appointment, AppointmentId, QueueStats, RetryPolicy, SyncTask, TaskId, TaskState,
};
use crate::{Error, Result};

/// Request body sent to the practice-management API for one booking.
///
/// Serialized exactly once, at enqueue time. The queue stores the bytes
/// opaquely; nothing re-reads them until the worker hands them to the
/// downstream client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Local appointment identifier
    pub appointment_id: String,
    /// Client display name
    pub client_name: String,
    /// Scheduled start (Unix ms)
    pub starts_at: i64,
}

/// Thread-safe service over the durable store.
///
/// The write path (`book_appointment`/`enqueue`) and the admin path
/// (`stats`/`retry_failed`) are both served here and never wait on the
/// sync worker; the worker goes through the same service for its state
/// transitions.
#[derive(Clone)]
pub struct SyncService {
    db: Arc<Mutex<Database>>,
}

impl SyncService {
    /// Open a service backed by a database at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Open an in-memory service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Book an appointment: write the primary record, then enqueue its
    /// propagation task.
    ///
    /// Returns as soon as both local writes land; the downstream system is
    /// never consulted. If the enqueue fails after the appointment row was
    /// written, the two stores are visibly inconsistent — that is logged
    /// loudly and surfaced to the caller rather than swallowed.
    pub async fn book_appointment(
        &self,
        client_name: &str,
        starts_at: i64,
    ) -> Result<(Appointment, TaskId)> {
        let client_name = client_name.trim();
        if client_name.is_empty() {
            return Err(Error::InvalidInput(
                "Client name must not be empty".to_string(),
            ));
        }

        let appointment = Appointment::new(client_name, starts_at);
        let payload = serde_json::to_vec(&BookingRequest {
            appointment_id: appointment.id.as_str(),
            client_name: appointment.client_name.clone(),
            starts_at: appointment.starts_at,
        })?;

        let db = self.db.lock().await;
        LibSqlAppointmentRepository::new(db.connection())
            .create(&appointment)
            .await?;

        let queue = LibSqlSyncQueueRepository::new(db.connection());
        match queue.enqueue(&appointment.id, &payload).await {
            Ok(task_id) => Ok((appointment, task_id)),
            Err(error) => {
                tracing::error!(
                    "Data consistency alert: appointment {} was written but its sync task \
                     could not be enqueued: {error}. The booking will not propagate until \
                     it is re-enqueued.",
                    appointment.id
                );
                Err(error)
            }
        }
    }

    /// Enqueue a propagation task for an existing appointment.
    pub async fn enqueue(&self, appointment_id: &AppointmentId, payload: &[u8]) -> Result<TaskId> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .enqueue(appointment_id, payload)
            .await
    }

    /// Fetch a sync task by id.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<SyncTask>> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection()).get(id).await
    }

    /// Fetch an appointment by id.
    pub async fn get_appointment(&self, id: &AppointmentId) -> Result<Option<Appointment>> {
        let db = self.db.lock().await;
        LibSqlAppointmentRepository::new(db.connection()).get(id).await
    }

    /// Claim up to `limit` tasks eligible for propagation at `now_ms`.
    pub async fn claim_batch(&self, limit: usize, now_ms: i64) -> Result<Vec<SyncTask>> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .claim_batch(limit, now_ms)
            .await
    }

    /// Transition a pending task to synced.
    pub async fn mark_synced(&self, id: TaskId, synced_at: i64) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .mark_synced(id, synced_at)
            .await
    }

    /// Record a failed propagation attempt.
    pub async fn record_failure(
        &self,
        id: TaskId,
        error: &str,
        now_ms: i64,
        policy: &RetryPolicy,
    ) -> Result<TaskState> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .record_failure(id, error, now_ms, policy)
            .await
    }

    /// Record the downstream-assigned identifier on an appointment.
    pub async fn set_external_id(&self, id: &AppointmentId, external_id: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlAppointmentRepository::new(db.connection())
            .set_external_id(id, external_id)
            .await
    }

    /// List failed tasks, oldest first.
    pub async fn list_failed(&self, limit: usize) -> Result<Vec<SyncTask>> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .list_failed(limit)
            .await
    }

    /// Aggregate queue counts by state.
    pub async fn stats(&self) -> Result<QueueStats> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection()).stats().await
    }

    /// Re-admit every failed task to pending. Idempotent.
    pub async fn retry_failed(&self) -> Result<u64> {
        let db = self.db.lock().await;
        LibSqlSyncQueueRepository::new(db.connection())
            .retry_failed()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_book_appointment_writes_record_and_task() {
        let service = SyncService::open_in_memory().await.unwrap();

        let (appointment, task_id) = service
            .book_appointment("Dana Reyes", 1_700_000_000_000)
            .await
            .unwrap();

        let stored = service
            .get_appointment(&appointment.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, appointment);

        let task = service.get_task(task_id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempt_count, 0);
        assert_eq!(task.appointment_id, appointment.id.as_str());

        // The stored payload is the exact request the worker will send
        let request: BookingRequest = serde_json::from_slice(&task.payload).unwrap();
        assert_eq!(request.appointment_id, appointment.id.as_str());
        assert_eq!(request.client_name, "Dana Reyes");
        assert_eq!(request.starts_at, 1_700_000_000_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_book_appointment_rejects_blank_client() {
        let service = SyncService::open_in_memory().await.unwrap();
        let result = service.book_appointment("   ", 0).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_enqueues_produce_distinct_tasks() {
        let service = SyncService::open_in_memory().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..100 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service
                    .book_appointment(&format!("Client {i}"), i)
                    .await
                    .unwrap()
                    .1
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }

        assert_eq!(ids.len(), 100);
        let stats = service.stats().await.unwrap();
        assert_eq!(stats.pending, 100);
        assert_eq!(stats.total, 100);
    }
}
