//! Error types for sensorlink-store.

use std::path::PathBuf;

/// Result type for sensorlink-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sensorlink-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No statistics stored for the run/sensor pair.
    #[error("Run not found: {run_id}/{sensor_id}")]
    RunNotFound { run_id: String, sensor_id: String },

    /// Stored timestamp outside the representable range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
