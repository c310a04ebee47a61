//! Sync task model and retry policy

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A unique identifier for a sync task.
///
/// Assigned monotonically by the queue store at insertion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(i64);

impl TaskId {
    /// Wrap a raw row id
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw row id
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a sync task.
///
/// `Synced` and `Failed` are terminal; the only way out of `Failed` is the
/// administrative reset back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Awaiting propagation (or eligible for retry)
    Pending,
    /// Delivered to the downstream system
    Synced,
    /// Retries exhausted; requires an administrative reset
    Failed,
}

impl TaskState {
    /// Database representation of this state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// One unit of deferred propagation work.
///
/// The payload is opaque at this layer: the queue stores the serialized
/// request body exactly as handed to `enqueue` and interprets it only at
/// send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTask {
    /// Unique, monotonically assigned identifier
    pub id: TaskId,
    /// Identifier of the appointment this task propagates
    pub appointment_id: String,
    /// Serialized request body, fixed at creation
    pub payload: Vec<u8>,
    /// Current lifecycle state
    pub state: TaskState,
    /// Number of failed propagation attempts so far
    pub attempt_count: u32,
    /// Earliest time (Unix ms) this task may be claimed again
    pub next_eligible_at: i64,
    /// Timestamp of the most recent attempt (Unix ms)
    pub last_attempt_at: Option<i64>,
    /// Description of the most recent failure
    pub last_error: Option<String>,
    /// Insertion timestamp (Unix ms)
    pub created_at: i64,
    /// Set once, on transition into `Synced` (Unix ms)
    pub synced_at: Option<i64>,
}

/// Retry and backoff policy applied by the queue store on each failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts before a task becomes `Failed`
    pub max_attempts: u32,
    /// Base delay for exponential backoff; zero retries every cycle
    pub backoff_base: Duration,
    /// Upper bound on the computed backoff delay
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Default maximum number of failed attempts
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Default backoff base delay
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(30);
    /// Default backoff cap
    pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(30 * 60);

    /// Create a policy with the given attempt limit and default backoff
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_base: Self::DEFAULT_BACKOFF_BASE,
            backoff_cap: Self::DEFAULT_BACKOFF_CAP,
        }
    }

    /// Set the backoff base delay
    #[must_use]
    pub const fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the backoff cap
    #[must_use]
    pub const fn with_backoff_cap(mut self, cap: Duration) -> Self {
        self.backoff_cap = cap;
        self
    }

    /// Compute the next eligibility time after a failed attempt.
    ///
    /// `attempt_count` is the number of failed attempts recorded so far,
    /// including the one that just happened. The delay doubles per failure
    /// (`base`, `2*base`, `4*base`, ...) and is bounded by the cap. A zero
    /// base makes every pending task eligible on the next cycle, which is
    /// the fixed-interval behavior this policy generalizes.
    #[must_use]
    pub fn next_eligible_at(&self, attempt_count: u32, now_ms: i64) -> i64 {
        if attempt_count == 0 || self.backoff_base.is_zero() {
            return now_ms;
        }

        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.backoff_cap.as_millis()).unwrap_or(u64::MAX);

        // Clamp the exponent so the shift cannot overflow.
        let exponent = u32::min(attempt_count - 1, 32);
        let delay_ms = base_ms
            .saturating_mul(1_u64 << exponent)
            .min(cap_ms);

        now_ms.saturating_add(i64::try_from(delay_ms).unwrap_or(i64::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Point-in-time aggregate counts of task states.
///
/// Computed as a query over the queue store; no in-memory counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks awaiting propagation or retry
    pub pending: u64,
    /// Tasks delivered downstream
    pub synced: u64,
    /// Tasks that exhausted their retries
    pub failed: u64,
    /// All tasks ever enqueued
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn task_state_round_trips_through_str() {
        for state in [TaskState::Pending, TaskState::Synced, TaskState::Failed] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("processing".parse::<TaskState>().is_err());
    }

    #[test]
    fn backoff_doubles_per_failed_attempt() {
        let policy = RetryPolicy::new(5)
            .with_backoff_base(Duration::from_secs(30))
            .with_backoff_cap(Duration::from_secs(3600));

        assert_eq!(policy.next_eligible_at(1, 0), 30_000);
        assert_eq!(policy.next_eligible_at(2, 0), 60_000);
        assert_eq!(policy.next_eligible_at(3, 0), 120_000);
        assert_eq!(policy.next_eligible_at(4, 1_000), 241_000);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new(100)
            .with_backoff_base(Duration::from_secs(30))
            .with_backoff_cap(Duration::from_secs(60));

        assert_eq!(policy.next_eligible_at(10, 0), 60_000);
        assert_eq!(policy.next_eligible_at(64, 0), 60_000);
    }

    #[test]
    fn zero_base_disables_backoff() {
        let policy = RetryPolicy::new(5).with_backoff_base(Duration::ZERO);
        assert_eq!(policy.next_eligible_at(3, 42), 42);
    }
}
