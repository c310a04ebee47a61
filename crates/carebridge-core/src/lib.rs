//! carebridge-core - Core library for Carebridge
//!
//! Write-behind synchronization for appointment booking: callers write
//! locally and return immediately; a background worker propagates each
//! write to the practice-management system, retrying transient failures
//! until delivery or exhaustion.

pub mod db;
pub mod downstream;
pub mod error;
pub mod models;
pub mod service;
pub mod worker;

pub use error::{Error, Result};
pub use models::{Appointment, AppointmentId, QueueStats, RetryPolicy, SyncTask, TaskId, TaskState};
pub use service::{BookingRequest, SyncService};
pub use worker::{CycleSummary, SyncWorker, SyncWorkerConfig};
