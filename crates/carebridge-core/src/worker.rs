//! Background sync worker
//!
//! Drains the queue on a fixed interval without ever blocking the write
//! path. Each cycle claims a bounded batch and works through it
//! sequentially; one task's failure is recorded against that task alone
//! and the cycle carries on. Unexpected errors are caught at both the
//! per-task and per-cycle level so the periodic schedule itself never
//! dies.

use std::time::Duration;

use tokio::sync::watch;

use crate::downstream::DownstreamClient;
use crate::models::{AppointmentId, RetryPolicy, SyncTask, TaskState};
use crate::service::SyncService;
use crate::Result;

/// Configuration for the periodic sync worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWorkerConfig {
    /// How often a cycle runs (default: 30 seconds)
    pub sync_interval: Duration,
    /// Maximum tasks claimed per cycle (default: 10)
    pub batch_size: usize,
    /// Retry and backoff policy (default: 5 attempts, exponential backoff)
    pub retry: RetryPolicy,
}

impl SyncWorkerConfig {
    /// Default cycle interval
    pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
    /// Default batch size
    pub const DEFAULT_BATCH_SIZE: usize = 10;

    /// Set the cycle interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the per-cycle batch size
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncWorkerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Self::DEFAULT_SYNC_INTERVAL,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// What one worker cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Tasks claimed this cycle
    pub claimed: usize,
    /// Tasks delivered downstream
    pub synced: usize,
    /// Tasks that failed and remain pending
    pub retried: usize,
    /// Tasks that exhausted their retries this cycle
    pub exhausted: usize,
}

/// Periodic batch processor that propagates queued writes downstream
pub struct SyncWorker<C> {
    service: SyncService,
    client: C,
    config: SyncWorkerConfig,
}

impl<C: DownstreamClient> SyncWorker<C> {
    /// Create a worker over the given service and downstream client
    pub const fn new(service: SyncService, client: C, config: SyncWorkerConfig) -> Self {
        Self {
            service,
            client,
            config,
        }
    }

    /// Run cycles on the configured interval until shutdown is signalled.
    ///
    /// A task in flight when shutdown arrives finishes its attempt; no
    /// further cycles are scheduled afterwards.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            "Sync worker started (interval {:?}, batch size {})",
            self.config.sync_interval,
            self.config.batch_size
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(summary) if summary.claimed > 0 => {
                            tracing::info!(
                                "Sync cycle: {} claimed, {} synced, {} retried, {} exhausted",
                                summary.claimed,
                                summary.synced,
                                summary.retried,
                                summary.exhausted
                            );
                        }
                        Ok(_) => {}
                        Err(error) => {
                            // A bad cycle must not terminate the schedule
                            tracing::error!("Sync cycle failed: {error}");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means nobody can ask us to stop later
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Sync worker stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Run a single cycle: claim a batch and process it sequentially.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let now = chrono::Utc::now().timestamp_millis();
        let tasks = self
            .service
            .claim_batch(self.config.batch_size, now)
            .await?;

        let mut summary = CycleSummary {
            claimed: tasks.len(),
            ..CycleSummary::default()
        };

        for task in &tasks {
            match self.process_task(task).await {
                Ok(TaskState::Synced) => summary.synced += 1,
                Ok(TaskState::Pending) => summary.retried += 1,
                Ok(TaskState::Failed) => summary.exhausted += 1,
                Err(error) => {
                    // Storage trouble for this task; the rest of the batch
                    // still gets its attempt.
                    tracing::error!("Task {}: storage error during sync attempt: {error}", task.id);
                }
            }
        }

        Ok(summary)
    }

    /// Attempt to propagate one task and record the outcome.
    async fn process_task(&self, task: &SyncTask) -> Result<TaskState> {
        match self.client.create_record(&task.payload).await {
            Ok(external_id) => {
                let now = chrono::Utc::now().timestamp_millis();
                if self.service.mark_synced(task.id, now).await? {
                    self.record_back_reference(task, &external_id).await;
                    tracing::debug!("Task {} synced as {external_id}", task.id);
                } else {
                    tracing::debug!("Task {} left pending while in flight; not recording", task.id);
                }
                Ok(TaskState::Synced)
            }
            Err(error) => {
                let now = chrono::Utc::now().timestamp_millis();
                let state = self
                    .service
                    .record_failure(task.id, &error.to_string(), now, &self.config.retry)
                    .await?;

                if state == TaskState::Failed {
                    tracing::warn!(
                        "Task {} for appointment {} failed permanently after {} attempts: {error}",
                        task.id,
                        task.appointment_id,
                        self.config.retry.max_attempts
                    );
                } else {
                    tracing::debug!("Task {} attempt failed, will retry: {error}", task.id);
                }
                Ok(state)
            }
        }
    }

    /// Best-effort cross-entity update: losing the back-reference never
    /// rolls back the sync outcome.
    async fn record_back_reference(&self, task: &SyncTask, external_id: &str) {
        let Ok(appointment_id) = task.appointment_id.parse::<AppointmentId>() else {
            tracing::warn!(
                "Task {} carries an unparseable appointment id {:?}",
                task.id,
                task.appointment_id
            );
            return;
        };

        match self
            .service
            .set_external_id(&appointment_id, external_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    "Appointment {appointment_id} missing while recording external id {external_id}"
                );
            }
            Err(error) => {
                tracing::warn!(
                    "Failed to record external id {external_id} on appointment \
                     {appointment_id}: {error}"
                );
            }
        }
    }
}
