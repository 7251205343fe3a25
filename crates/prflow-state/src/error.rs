//! Error types for prflow-state

use thiserror::Error;

/// Errors that can occur in the workflow persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Could not reach or open the backing database
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend rejected a query or returned something unreadable
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Record could not be encoded or decoded
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Record failed a structural check before being written
    #[error("Invalid workflow record {workflow_id}: {reason}")]
    InvalidRecord { workflow_id: String, reason: String },
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
