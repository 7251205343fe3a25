//! Workflow execution tracking.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use prflow_state::WorkflowRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::error::{PrflowError, Result};
use crate::domain::finding::AnalysisResult;
use crate::domain::pr_context::PrContext;

/// Unique identifier for one workflow execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new() -> Self {
        WorkflowId(format!("wf-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        WorkflowId(s.to_string())
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Workflow lifecycle state.
///
/// Canonical order: pending -> analyzing -> creating-issues -> auto-fixing
/// -> validating -> completed. `Failed` is reachable from every
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowState {
    Pending,
    Analyzing,
    CreatingIssues,
    AutoFixing,
    Validating,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Pending => "pending",
            WorkflowState::Analyzing => "analyzing",
            WorkflowState::CreatingIssues => "creating-issues",
            WorkflowState::AutoFixing => "auto-fixing",
            WorkflowState::Validating => "validating",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// Next state in the canonical order, `None` for terminal states.
    pub fn successor(self) -> Option<WorkflowState> {
        match self {
            WorkflowState::Pending => Some(WorkflowState::Analyzing),
            WorkflowState::Analyzing => Some(WorkflowState::CreatingIssues),
            WorkflowState::CreatingIssues => Some(WorkflowState::AutoFixing),
            WorkflowState::AutoFixing => Some(WorkflowState::Validating),
            WorkflowState::Validating => Some(WorkflowState::Completed),
            WorkflowState::Completed | WorkflowState::Failed => None,
        }
    }

    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == WorkflowState::Failed || self.successor() == Some(next)
    }

    pub fn parse(s: &str) -> Option<WorkflowState> {
        [
            WorkflowState::Pending,
            WorkflowState::Analyzing,
            WorkflowState::CreatingIssues,
            WorkflowState::AutoFixing,
            WorkflowState::Validating,
            WorkflowState::Completed,
            WorkflowState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: WorkflowState,
    pub to: WorkflowState,
    pub at: DateTime<Utc>,
}

/// Error captured on a workflow when a phase fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowErrorRecord {
    pub message: String,
    pub trace: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// How many registered modules reported during the analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisCoverage {
    pub modules_run: usize,
    pub modules_failed: usize,
}

impl AnalysisCoverage {
    /// Share of modules that reported, 0-100. An empty pass counts as 0.
    pub fn percent(&self) -> f64 {
        if self.modules_run == 0 {
            return 0.0;
        }
        let ok = self.modules_run.saturating_sub(self.modules_failed);
        ok as f64 / self.modules_run as f64 * 100.0
    }
}

/// Before/after reconciliation computed by the validation phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub original: usize,
    pub remaining: usize,
    pub fixed: usize,
    pub percentage: f64,
}

impl Improvement {
    pub fn measure(original: usize, remaining: usize) -> Self {
        let fixed = original.saturating_sub(remaining);
        let percentage = if original == 0 {
            0.0
        } else {
            fixed as f64 / original as f64 * 100.0
        };
        Self {
            original,
            remaining,
            fixed,
            percentage,
        }
    }
}

/// One end-to-end analysis run for a pull request.
///
/// `state`, `completed_at`, the transition log and the auto-fix attempt
/// counter are only changed through methods so that the lifecycle
/// invariants hold: states follow the canonical order, `completed_at` is
/// set exactly when the state is terminal, and attempts never decrease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: WorkflowId,
    pub pr_id: String,
    state: WorkflowState,
    pub started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    /// Findings from the analysis phase.
    pub results: Vec<AnalysisResult>,
    /// Findings still reported by the validation pass.
    pub residual_results: Vec<AnalysisResult>,
    /// Tracking issue ids; the first entry is the main issue.
    pub issue_ids: Vec<String>,
    auto_fix_attempts: u32,
    pub auto_fix_successes: u32,
    pub errors: Vec<WorkflowErrorRecord>,
    /// Keys: `pr_number`, `repository`, `author`, `files_changed`, and
    /// `sub_issues` (group to issue id) once issues exist.
    pub metadata: BTreeMap<String, serde_json::Value>,
    transitions: Vec<StateTransition>,
    pub coverage: Option<AnalysisCoverage>,
    pub improvement: Option<Improvement>,
}

impl WorkflowExecution {
    pub fn new(pr: &PrContext) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("pr_number".to_string(), serde_json::json!(pr.number));
        metadata.insert("repository".to_string(), serde_json::json!(pr.repository));
        metadata.insert("author".to_string(), serde_json::json!(pr.author));
        metadata.insert(
            "files_changed".to_string(),
            serde_json::json!(pr.files.len()),
        );

        Self {
            id: WorkflowId::new(),
            pr_id: pr.id.clone(),
            state: WorkflowState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            residual_results: Vec::new(),
            issue_ids: Vec::new(),
            auto_fix_attempts: 0,
            auto_fix_successes: 0,
            errors: Vec::new(),
            metadata,
            transitions: Vec::new(),
            coverage: None,
            improvement: None,
        }
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    pub fn auto_fix_attempts(&self) -> u32 {
        self.auto_fix_attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn main_issue_id(&self) -> Option<&str> {
        self.issue_ids.first().map(String::as_str)
    }

    /// Move to `next`, recording the transition.
    pub fn transition_to(&mut self, next: WorkflowState) -> Result<StateTransition> {
        if !self.state.can_transition_to(next) {
            return Err(PrflowError::InvalidTransition {
                workflow_id: self.id.to_string(),
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        let transition = StateTransition {
            from: self.state,
            to: next,
            at: now,
        };
        self.state = next;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.transitions.push(transition.clone());
        Ok(transition)
    }

    pub fn record_auto_fix_attempt(&mut self) {
        self.auto_fix_attempts = self.auto_fix_attempts.saturating_add(1);
    }

    pub fn record_error(&mut self, message: impl Into<String>, trace: Option<String>) {
        self.errors.push(WorkflowErrorRecord {
            message: message.into(),
            trace,
            timestamp: Utc::now(),
        });
    }

    /// Elapsed time, measured to `completed_at` or to now while running.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }

    /// Convert into the backend-neutral persisted form.
    pub fn to_record(&self) -> Result<WorkflowRecord> {
        Ok(WorkflowRecord {
            workflow_id: self.id.to_string(),
            pr_id: self.pr_id.clone(),
            state: self.state.as_str().to_string(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            payload: serde_json::to_value(self)?,
        })
    }

    /// Rebuild from a persisted record.
    pub fn from_record(record: WorkflowRecord) -> Result<Self> {
        Ok(serde_json::from_value(record.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pr() -> PrContext {
        PrContext {
            id: "PR_1".to_string(),
            number: 7,
            title: "t".to_string(),
            description: None,
            author: "octo".to_string(),
            base_branch: "main".to_string(),
            head_branch: "feat".to_string(),
            repository: "acme/api".to_string(),
            files: Vec::new(),
            commits: Vec::new(),
        }
    }

    #[test]
    fn new_workflow_is_pending_with_metadata() {
        let wf = WorkflowExecution::new(&pr());
        assert_eq!(wf.state(), WorkflowState::Pending);
        assert!(wf.completed_at().is_none());
        assert_eq!(wf.metadata["pr_number"], serde_json::json!(7));
        assert_eq!(wf.metadata["repository"], serde_json::json!("acme/api"));
        assert_eq!(wf.metadata["files_changed"], serde_json::json!(0));
    }

    #[test]
    fn canonical_path_reaches_completed() {
        let mut wf = WorkflowExecution::new(&pr());
        for next in [
            WorkflowState::Analyzing,
            WorkflowState::CreatingIssues,
            WorkflowState::AutoFixing,
            WorkflowState::Validating,
        ] {
            wf.transition_to(next).unwrap();
            assert!(wf.completed_at().is_none());
        }
        wf.transition_to(WorkflowState::Completed).unwrap();
        assert!(wf.completed_at().is_some());
        assert_eq!(wf.transitions().len(), 5);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut wf = WorkflowExecution::new(&pr());
        let err = wf.transition_to(WorkflowState::AutoFixing).unwrap_err();
        assert!(matches!(err, PrflowError::InvalidTransition { .. }));
        assert_eq!(wf.state(), WorkflowState::Pending);
    }

    #[test]
    fn failed_reachable_from_any_non_terminal_state_only() {
        let mut wf = WorkflowExecution::new(&pr());
        wf.transition_to(WorkflowState::Analyzing).unwrap();
        wf.transition_to(WorkflowState::Failed).unwrap();
        assert!(wf.completed_at().is_some());
        assert!(wf.transition_to(WorkflowState::Failed).is_err());
        assert!(wf.transition_to(WorkflowState::CreatingIssues).is_err());
    }

    #[test]
    fn improvement_from_ten_to_four() {
        let imp = Improvement::measure(10, 4);
        assert_eq!(imp.fixed, 6);
        assert_eq!(imp.percentage, 60.0);
    }

    #[test]
    fn improvement_with_no_original_findings_is_zero() {
        let imp = Improvement::measure(0, 3);
        assert_eq!(imp.fixed, 0);
        assert_eq!(imp.percentage, 0.0);
    }

    #[test]
    fn record_round_trip_keeps_private_fields() {
        let mut wf = WorkflowExecution::new(&pr());
        wf.transition_to(WorkflowState::Analyzing).unwrap();
        wf.record_auto_fix_attempt();
        wf.transition_to(WorkflowState::Failed).unwrap();

        let record = wf.to_record().unwrap();
        assert_eq!(record.state, "failed");
        let back = WorkflowExecution::from_record(record).unwrap();
        assert_eq!(back, wf);
        assert_eq!(back.auto_fix_attempts(), 1);
    }

    #[test]
    fn parse_matches_display() {
        assert_eq!(
            WorkflowState::parse("creating-issues"),
            Some(WorkflowState::CreatingIssues)
        );
        assert_eq!(WorkflowState::parse("nope"), None);
    }
}
