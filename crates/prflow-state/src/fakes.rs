//! In-memory fake for `WorkflowStore` (testing and one-shot CLI runs)
//!
//! Besides satisfying the trait contract, `MemoryWorkflowStore` counts
//! save calls and can be told to fail them, which lets orchestrator tests
//! assert the "saved exactly once" guarantee and the failure path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory workflow store backed by a `HashMap<workflow_id, record>`.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    records: Mutex<HashMap<String, WorkflowRecord>>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_workflow` calls observed, including failed ones.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every subsequent save return a backend error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, WorkflowRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save_workflow(&self, record: WorkflowRecord) -> StorageResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected save failure".to_string()));
        }
        record.validate()?;
        self.records().insert(record.workflow_id.clone(), record);
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> StorageResult<Option<WorkflowRecord>> {
        Ok(self.records().get(workflow_id).cloned())
    }

    async fn list_workflows(&self, pr_id: Option<&str>) -> StorageResult<Vec<WorkflowRecord>> {
        let mut rows: Vec<WorkflowRecord> = self
            .records()
            .values()
            .filter(|r| pr_id.map_or(true, |p| r.pr_id == p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(rows)
    }
}
