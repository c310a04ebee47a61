//! Appointment model
//!
//! Only the fields the sync queue touches: the queue needs an id to tie
//! tasks to and a slot for the downstream back-reference. Everything else
//! about the appointment lives with the booking layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for an appointment, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentId(Uuid);

impl AppointmentId {
    /// Create a new unique appointment ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AppointmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AppointmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A booked appointment awaiting (or past) downstream propagation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Unique identifier
    pub id: AppointmentId,
    /// Client display name
    pub client_name: String,
    /// Scheduled start (Unix ms)
    pub starts_at: i64,
    /// Identifier assigned by the practice-management system once synced
    pub external_id: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Appointment {
    /// Create a new appointment for the given client and start time
    #[must_use]
    pub fn new(client_name: impl Into<String>, starts_at: i64) -> Self {
        Self {
            id: AppointmentId::new(),
            client_name: client_name.into(),
            starts_at,
            external_id: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
