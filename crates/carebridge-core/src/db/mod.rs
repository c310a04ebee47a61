//! Database layer for Carebridge

mod appointment_repository;
mod connection;
mod migrations;
mod queue_repository;

pub use appointment_repository::{AppointmentRepository, LibSqlAppointmentRepository};
pub use connection::Database;
pub use queue_repository::{LibSqlSyncQueueRepository, SyncQueueRepository};
