//! Data models for Carebridge

mod appointment;
mod task;

pub use appointment::{Appointment, AppointmentId};
pub use task::{QueueStats, RetryPolicy, SyncTask, TaskId, TaskState};
