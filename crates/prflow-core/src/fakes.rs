//! In-memory collaborators and scripted modules for tests.
//!
//! Nothing here talks to the network; every fake records what it was asked
//! to do so tests can assert on the interaction.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{
    AnalysisResult, AutoFixResult, Category, ChangeType, ChangedFile, CommitInfo, FileChange,
    FileStatus, FindingId, GroupKey, Improvement, PrContext, PrflowError, Result,
    WorkflowExecution,
};
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};
use crate::ports::{AutoFixAgent, ErrorRecovery, IssueTracker};

/// A three-file pull request with small unified diffs.
pub fn sample_pr() -> PrContext {
    PrContext {
        id: "PR_kwDOAB".to_string(),
        number: 42,
        title: "Add retry support".to_string(),
        description: Some("Retries transient failures".to_string()),
        author: "octo".to_string(),
        base_branch: "main".to_string(),
        head_branch: "feat/retry".to_string(),
        repository: "acme/api".to_string(),
        files: vec![
            ChangedFile {
                path: "src/retry.rs".to_string(),
                status: FileStatus::Added,
                additions: 3,
                deletions: 0,
                patch: Some(
                    "@@ -0,0 +1,3 @@\n+pub fn retry() {\n+    // TODO: backoff\n+}\n".to_string(),
                ),
            },
            ChangedFile {
                path: "src/lib.rs".to_string(),
                status: FileStatus::Modified,
                additions: 1,
                deletions: 1,
                patch: Some("@@ -1,2 +1,2 @@\n-mod old;\n+mod retry;\n pub use retry::*;\n".to_string()),
            },
            ChangedFile {
                path: "README.md".to_string(),
                status: FileStatus::Modified,
                additions: 1,
                deletions: 0,
                patch: None,
            },
        ],
        commits: vec![CommitInfo {
            sha: "0123456789abcdef".to_string(),
            message: "add retry".to_string(),
            author: Some("octo".to_string()),
        }],
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Behavior {
    Succeed,
    Fail(String),
    Panic,
}

/// Analysis module whose output is fixed up front.
///
/// Findings fixed through `auto_fix` are no longer reported by later
/// passes, so validation sees an improvement.
pub struct ScriptedModule {
    name: String,
    category: Category,
    findings: Vec<AnalysisResult>,
    delay: Option<Duration>,
    behavior: Behavior,
    auto_fix: bool,
    fixed: Mutex<HashSet<FindingId>>,
    calls: AtomicUsize,
    fixes: AtomicUsize,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

impl ScriptedModule {
    pub fn new(name: impl Into<String>, category: Category) -> Self {
        Self {
            name: name.into(),
            category,
            findings: Vec::new(),
            delay: None,
            behavior: Behavior::Succeed,
            auto_fix: false,
            fixed: Mutex::new(HashSet::new()),
            calls: AtomicUsize::new(0),
            fixes: AtomicUsize::new(0),
            journal: None,
        }
    }

    pub fn with_findings(mut self, findings: Vec<AnalysisResult>) -> Self {
        self.findings = findings;
        self
    }

    /// Sleep this long (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.behavior = Behavior::Fail(message.into());
        self
    }

    pub fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }

    pub fn with_auto_fix(mut self) -> Self {
        self.auto_fix = true;
        self
    }

    /// Append the module name to `journal` each time `analyze` starts.
    pub fn recording_into(mut self, journal: Arc<Mutex<Vec<String>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fixes_applied(&self) -> usize {
        self.fixes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisModule for ScriptedModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn version(&self) -> &str {
        "0.0.1"
    }

    async fn analyze(
        &self,
        _pr: &PrContext,
        _settings: &ModuleSettings,
    ) -> std::result::Result<Vec<AnalysisResult>, ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(journal) = &self.journal {
            lock(journal).push(self.name.clone());
        }
        if let Behavior::Panic = self.behavior {
            panic!("scripted panic in {}", self.name);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Fail(message) => Err(ModuleError::Failed(message.clone())),
            _ => {
                let fixed = lock(&self.fixed);
                Ok(self
                    .findings
                    .iter()
                    .filter(|f| !fixed.contains(&f.id))
                    .cloned()
                    .collect())
            }
        }
    }

    fn can_auto_fix(&self, result: &AnalysisResult) -> bool {
        self.auto_fix && result.auto_fixable
    }

    fn supports_auto_fix(&self) -> bool {
        self.auto_fix
    }

    async fn auto_fix(
        &self,
        result: &AnalysisResult,
        _pr: &PrContext,
    ) -> std::result::Result<AutoFixResult, ModuleError> {
        if !self.auto_fix {
            return Err(ModuleError::Unsupported);
        }
        self.fixes.fetch_add(1, Ordering::SeqCst);
        lock(&self.fixed).insert(result.id.clone());
        let path = result
            .location
            .as_ref()
            .map(|l| l.file.clone())
            .unwrap_or_default();
        Ok(AutoFixResult::applied(vec![FileChange {
            path,
            change_type: ChangeType::Modified,
            content: None,
            diff: None,
        }]))
    }
}

/// One interaction with [`RecordingIssueTracker`].
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerCall {
    CreateMain {
        id: String,
        results: usize,
    },
    CreateSub {
        id: String,
        parent_id: String,
        group: GroupKey,
        results: usize,
    },
    FixUpdate {
        issue_id: String,
        finding: FindingId,
        success: bool,
    },
    Validation {
        issue_id: String,
        improvement: Improvement,
        remaining: usize,
    },
}

/// Issue tracker that hands out `ISSUE-<n>` ids and records every call.
#[derive(Default)]
pub struct RecordingIssueTracker {
    calls: Mutex<Vec<TrackerCall>>,
    next_id: AtomicUsize,
    fail_main: AtomicBool,
    fail_sub: AtomicBool,
    fail_fix_updates: AtomicBool,
}

impl RecordingIssueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_main_issue` reject.
    pub fn fail_main(&self, fail: bool) {
        self.fail_main.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sub(&self, fail: bool) {
        self.fail_sub.store(fail, Ordering::SeqCst);
    }

    /// Make `update_issue_with_fix` reject.
    pub fn fail_fix_updates(&self, fail: bool) {
        self.fail_fix_updates.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<TrackerCall> {
        lock(&self.calls).clone()
    }

    fn mint(&self) -> String {
        format!("ISSUE-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl IssueTracker for RecordingIssueTracker {
    async fn create_main_issue(
        &self,
        _pr: &PrContext,
        results: &[AnalysisResult],
    ) -> Result<String> {
        if self.fail_main.load(Ordering::SeqCst) {
            return Err(PrflowError::IssueTracker(
                "issue tracker unavailable".to_string(),
            ));
        }
        let id = self.mint();
        lock(&self.calls).push(TrackerCall::CreateMain {
            id: id.clone(),
            results: results.len(),
        });
        Ok(id)
    }

    async fn create_sub_issue(
        &self,
        parent_id: &str,
        group: &GroupKey,
        results: &[&AnalysisResult],
        _pr: &PrContext,
    ) -> Result<String> {
        if self.fail_sub.load(Ordering::SeqCst) {
            return Err(PrflowError::IssueTracker("sub-issue rejected".to_string()));
        }
        let id = self.mint();
        lock(&self.calls).push(TrackerCall::CreateSub {
            id: id.clone(),
            parent_id: parent_id.to_string(),
            group: group.clone(),
            results: results.len(),
        });
        Ok(id)
    }

    async fn update_issue_with_fix(
        &self,
        issue_id: &str,
        result: &AnalysisResult,
        fix: &AutoFixResult,
    ) -> Result<()> {
        if self.fail_fix_updates.load(Ordering::SeqCst) {
            return Err(PrflowError::IssueTracker("issue update rejected".to_string()));
        }
        lock(&self.calls).push(TrackerCall::FixUpdate {
            issue_id: issue_id.to_string(),
            finding: result.id.clone(),
            success: fix.success,
        });
        Ok(())
    }

    async fn update_main_issue_with_validation(
        &self,
        issue_id: &str,
        improvement: &Improvement,
        remaining: &[AnalysisResult],
    ) -> Result<()> {
        lock(&self.calls).push(TrackerCall::Validation {
            issue_id: issue_id.to_string(),
            improvement: *improvement,
            remaining: remaining.len(),
        });
        Ok(())
    }
}

enum FixMode {
    Succeed,
    Unsuccessful(String),
    Error(String),
}

/// Auto-fix agent with a fixed answer; records the finding ids it saw.
pub struct ScriptedAutoFixAgent {
    mode: FixMode,
    requests: Mutex<Vec<FindingId>>,
}

impl ScriptedAutoFixAgent {
    pub fn succeeding() -> Self {
        Self::with_mode(FixMode::Succeed)
    }

    /// Answer with `success = false`.
    pub fn unsuccessful(reason: impl Into<String>) -> Self {
        Self::with_mode(FixMode::Unsuccessful(reason.into()))
    }

    /// Return an error instead of a result.
    pub fn erroring(message: impl Into<String>) -> Self {
        Self::with_mode(FixMode::Error(message.into()))
    }

    fn with_mode(mode: FixMode) -> Self {
        Self {
            mode,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FindingId> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl AutoFixAgent for ScriptedAutoFixAgent {
    async fn request_auto_fix(
        &self,
        result: &AnalysisResult,
        _pr: &PrContext,
        _issue_ids: &[String],
    ) -> Result<AutoFixResult> {
        lock(&self.requests).push(result.id.clone());
        match &self.mode {
            FixMode::Succeed => Ok(AutoFixResult::applied(Vec::new()).with_commit("c0ffee")),
            FixMode::Unsuccessful(reason) => Ok(AutoFixResult::failed(reason.clone())),
            FixMode::Error(message) => Err(PrflowError::AutoFix(message.clone())),
        }
    }
}

/// Error-recovery hook that records `(workflow id, error)` pairs.
#[derive(Default)]
pub struct RecordingRecovery {
    seen: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingRecovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the hook itself return an error.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside the hook before answering.
    pub fn delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<(String, String)> {
        lock(&self.seen).clone()
    }
}

#[async_trait]
impl ErrorRecovery for RecordingRecovery {
    async fn handle_workflow_failure(
        &self,
        workflow: &WorkflowExecution,
        error: &PrflowError,
    ) -> Result<()> {
        lock(&self.seen).push((workflow.id.to_string(), error.to_string()));
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(PrflowError::IssueTracker(
                "recovery hook unavailable".to_string(),
            ));
        }
        Ok(())
    }
}
