//! Error types for carebridge-core

use thiserror::Error;

/// Result type alias using carebridge-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in carebridge-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store unavailable or misbehaving
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sync task not found
    #[error("Sync task not found: {0}")]
    TaskNotFound(i64),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
