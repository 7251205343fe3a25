//! Storage trait definitions for prflow
//!
//! `WorkflowStore` is the only persistence contract the orchestrator needs:
//! it saves a workflow once it reaches a terminal state and loads it back
//! for status queries after the in-memory copy has been evicted.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Backend-neutral persisted form of a workflow execution.
///
/// The indexed columns are lifted out of the payload so backends can
/// query on them; `payload` holds the complete serialized workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub pr_id: String,
    /// Kebab-case workflow state, e.g. `"completed"`
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub payload: serde_json::Value,
}

impl WorkflowRecord {
    /// Reject records that would be unreadable later.
    pub fn validate(&self) -> StorageResult<()> {
        if self.workflow_id.trim().is_empty() {
            return Err(StorageError::InvalidRecord {
                workflow_id: self.workflow_id.clone(),
                reason: "workflow_id must not be empty".to_string(),
            });
        }
        if !self.payload.is_object() {
            return Err(StorageError::InvalidRecord {
                workflow_id: self.workflow_id.clone(),
                reason: "payload must be a JSON object".to_string(),
            });
        }
        Ok(())
    }
}

/// Workflow persistence.
///
/// Guarantees:
/// - `save_workflow` is an upsert keyed by `workflow_id`.
/// - `get_workflow` returns `None` for unknown ids rather than an error.
/// - `list_workflows` returns newest first by `started_at`.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow record.
    async fn save_workflow(&self, record: WorkflowRecord) -> StorageResult<()>;

    /// Load a workflow record by id.
    async fn get_workflow(&self, workflow_id: &str) -> StorageResult<Option<WorkflowRecord>>;

    /// List workflow records, optionally restricted to one pull request.
    async fn list_workflows(&self, pr_id: Option<&str>) -> StorageResult<Vec<WorkflowRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, payload: serde_json::Value) -> WorkflowRecord {
        WorkflowRecord {
            workflow_id: id.to_string(),
            pr_id: "pr-1".to_string(),
            state: "completed".to_string(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            payload,
        }
    }

    #[test]
    fn validate_accepts_object_payload() {
        assert!(record("wf-1", serde_json::json!({"id": "wf-1"}))
            .validate()
            .is_ok());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let err = record("  ", serde_json::json!({})).validate().unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[test]
    fn validate_rejects_non_object_payload() {
        let err = record("wf-2", serde_json::json!([1, 2]))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
