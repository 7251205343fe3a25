//! Auto-fix outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change an auto-fix made to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
}

/// A single file touched by an auto-fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change_type: ChangeType,
    /// Full replacement content, when the fixer produced it.
    pub content: Option<String>,
    /// Unified diff, when the fixer produced it.
    pub diff: Option<String>,
}

/// Result of one auto-fix request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixResult {
    pub success: bool,
    pub changes: Vec<FileChange>,
    pub commit_id: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AutoFixResult {
    pub fn applied(changes: Vec<FileChange>) -> Self {
        Self {
            success: true,
            changes,
            commit_id: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            changes: Vec::new(),
            commit_id: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_commit(mut self, commit_id: impl Into<String>) -> Self {
        self.commit_id = Some(commit_id.into());
        self
    }
}
