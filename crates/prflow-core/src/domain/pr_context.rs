//! Pull request snapshot supplied by event ingestion.

use serde::{Deserialize, Serialize};

/// How a file changed in the pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Unified diff text, absent for binary or oversized files.
    #[serde(default)]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Read-only snapshot of the pull request under analysis.
///
/// Already validated and normalised by the ingestion layer; the core never
/// mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrContext {
    pub id: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub author: String,
    pub base_branch: String,
    pub head_branch: String,
    /// `owner/name` of the repository.
    pub repository: String,
    #[serde(default)]
    pub files: Vec<ChangedFile>,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

impl PrContext {
    /// Key identifying the pull request across runs, e.g. `acme/api#42`.
    pub fn key(&self) -> String {
        format!("{}#{}", self.repository, self.number)
    }

    pub fn total_additions(&self) -> u64 {
        self.files.iter().map(|f| u64::from(f.additions)).sum()
    }

    pub fn total_deletions(&self) -> u64 {
        self.files.iter().map(|f| u64::from(f.deletions)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_payload() {
        let pr: PrContext = serde_json::from_value(serde_json::json!({
            "id": "PR_kw1",
            "number": 42,
            "title": "Add cache",
            "author": "octo",
            "base_branch": "main",
            "head_branch": "feature/cache",
            "repository": "acme/api",
            "files": [
                {"path": "src/cache.rs", "status": "added", "additions": 10, "deletions": 0}
            ]
        }))
        .unwrap();

        assert_eq!(pr.key(), "acme/api#42");
        assert_eq!(pr.files[0].status, FileStatus::Added);
        assert!(pr.files[0].patch.is_none());
        assert!(pr.commits.is_empty());
        assert_eq!(pr.total_additions(), 10);
    }
}
