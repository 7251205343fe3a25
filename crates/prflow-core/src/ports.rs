//! Collaborator ports driven by the orchestrator.
//!
//! Each port is an async trait so deployments can plug in a real issue
//! tracker or code-fixing agent; [`crate::fakes`] carries in-memory
//! implementations for tests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    AnalysisResult, AutoFixResult, GroupKey, Improvement, PrContext, PrflowError, Result,
    WorkflowExecution,
};
use crate::engine::AnalysisEngine;

/// External issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Create the top-level issue summarizing the whole run.
    async fn create_main_issue(&self, pr: &PrContext, results: &[AnalysisResult])
        -> Result<String>;

    /// Create the issue for one `(type, module)` group, linked to `parent_id`.
    async fn create_sub_issue(
        &self,
        parent_id: &str,
        group: &GroupKey,
        results: &[&AnalysisResult],
        pr: &PrContext,
    ) -> Result<String>;

    async fn update_issue_with_fix(
        &self,
        issue_id: &str,
        result: &AnalysisResult,
        fix: &AutoFixResult,
    ) -> Result<()>;

    async fn update_main_issue_with_validation(
        &self,
        issue_id: &str,
        improvement: &Improvement,
        remaining: &[AnalysisResult],
    ) -> Result<()>;
}

/// Code-fixing agent.
#[async_trait]
pub trait AutoFixAgent: Send + Sync {
    async fn request_auto_fix(
        &self,
        result: &AnalysisResult,
        pr: &PrContext,
        issue_ids: &[String],
    ) -> Result<AutoFixResult>;
}

/// Hook invoked once for every workflow that ends in `failed`.
#[async_trait]
pub trait ErrorRecovery: Send + Sync {
    async fn handle_workflow_failure(
        &self,
        workflow: &WorkflowExecution,
        error: &PrflowError,
    ) -> Result<()>;
}

/// Auto-fix agent that hands the finding back to the module that
/// produced it.
pub struct ModuleAutoFixAgent {
    engine: Arc<AnalysisEngine>,
}

impl ModuleAutoFixAgent {
    pub fn new(engine: Arc<AnalysisEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl AutoFixAgent for ModuleAutoFixAgent {
    async fn request_auto_fix(
        &self,
        result: &AnalysisResult,
        pr: &PrContext,
        _issue_ids: &[String],
    ) -> Result<AutoFixResult> {
        Ok(self.engine.request_auto_fix(result, pr).await?)
    }
}
