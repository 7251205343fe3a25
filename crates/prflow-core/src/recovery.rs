//! Failure classification and recovery decisions for failed workflows.
//!
//! The planner does not re-run anything itself. It records an auditable
//! [`RecoveryDecision`] per failed workflow so an operator or a scheduler
//! can act on it.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{PrflowError, Result, WorkflowExecution, WorkflowState};
use crate::ports::ErrorRecovery;

/// Phase a workflow was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Analysis,
    IssueTracking,
    AutoFix,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    /// Retries granted per PR for transient failures before escalating.
    pub max_retries_per_pr: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_pr: 2,
        }
    }
}

/// One auditable decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryDecision {
    pub workflow_id: String,
    pub pr_id: String,
    pub failure_class: FailureClass,
    pub action: RecoveryAction,
    pub rationale: String,
    pub decided_at: DateTime<Utc>,
}

/// Classify by the state the workflow left when it moved to `failed`.
pub fn classify_failure(workflow: &WorkflowExecution, error: &PrflowError) -> FailureClass {
    let failed_in = workflow
        .transitions()
        .iter()
        .rev()
        .find(|t| t.to == WorkflowState::Failed)
        .map(|t| t.from)
        .unwrap_or(workflow.state());

    match failed_in {
        WorkflowState::Analyzing => FailureClass::Analysis,
        WorkflowState::CreatingIssues => FailureClass::IssueTracking,
        WorkflowState::AutoFixing => FailureClass::AutoFix,
        WorkflowState::Validating => FailureClass::Validation,
        _ => match error {
            PrflowError::IssueTracker(_) => FailureClass::IssueTracking,
            PrflowError::AutoFix(_) => FailureClass::AutoFix,
            PrflowError::Engine(_) => FailureClass::Analysis,
            _ => FailureClass::Unknown,
        },
    }
}

/// Heuristic for failures worth retrying unchanged.
pub fn is_transient(error: &PrflowError) -> bool {
    let msg = error.to_string().to_lowercase();
    [
        "timed out",
        "timeout",
        "unavailable",
        "connection",
        "rate limit",
        "temporarily",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

/// Default [`ErrorRecovery`] collaborator.
#[derive(Default)]
pub struct RecoveryPlanner {
    policy: RecoveryPolicy,
    decisions: Mutex<Vec<RecoveryDecision>>,
}

impl RecoveryPlanner {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            decisions: Mutex::new(Vec::new()),
        }
    }

    pub fn decisions(&self) -> Vec<RecoveryDecision> {
        self.decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decide what to do about one failed workflow and record it.
    pub fn plan(&self, workflow: &WorkflowExecution, error: &PrflowError) -> RecoveryDecision {
        let failure_class = classify_failure(workflow, error);
        let mut decisions = self
            .decisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let retries_used = decisions
            .iter()
            .filter(|d| d.pr_id == workflow.pr_id && d.action == RecoveryAction::Retry)
            .count() as u32;

        let (action, rationale) = if !is_transient(error) {
            (
                RecoveryAction::Escalate,
                format!("{failure_class:?} failure is not transient"),
            )
        } else if retries_used >= self.policy.max_retries_per_pr {
            (
                RecoveryAction::Escalate,
                format!("retry budget of {} exhausted", self.policy.max_retries_per_pr),
            )
        } else {
            (
                RecoveryAction::Retry,
                format!(
                    "transient {failure_class:?} failure; retry {} of {}",
                    retries_used + 1,
                    self.policy.max_retries_per_pr
                ),
            )
        };

        let decision = RecoveryDecision {
            workflow_id: workflow.id.to_string(),
            pr_id: workflow.pr_id.clone(),
            failure_class,
            action,
            rationale,
            decided_at: Utc::now(),
        };
        decisions.push(decision.clone());
        decision
    }
}

#[async_trait]
impl ErrorRecovery for RecoveryPlanner {
    async fn handle_workflow_failure(
        &self,
        workflow: &WorkflowExecution,
        error: &PrflowError,
    ) -> Result<()> {
        let decision = self.plan(workflow, error);
        warn!(
            event = "workflow.recovery",
            workflow_id = %decision.workflow_id,
            failure_class = ?decision.failure_class,
            action = ?decision.action,
            rationale = %decision.rationale,
        );
        Ok(())
    }
}
