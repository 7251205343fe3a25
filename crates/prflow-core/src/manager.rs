//! Workflow manager: the canonical map of workflow id to execution.
//!
//! Status queries, filtering and aggregate reporting go through here
//! without touching the orchestrator's drive loop. Every mutation of a
//! tracked workflow is applied under the map's write lock.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::PerformanceTargets;
use crate::domain::{
    AnalysisCoverage, AnalysisResult, Improvement, PrContext, PrflowError, Result,
    WorkflowExecution, WorkflowId, WorkflowState,
};
use crate::events::{EventBus, Notification};
use crate::obs;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    pub total: usize,
    pub by_state: BTreeMap<WorkflowState, usize>,
    pub active: usize,
    /// Mean duration of terminal workflows, 0 when there are none.
    pub average_duration_secs: f64,
    /// Completed share of terminal workflows, 0-100.
    pub success_rate: f64,
}

/// Averages over terminal workflows. `None` means no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub workflows_measured: usize,
    pub average_duration_secs: Option<f64>,
    pub average_findings_per_run: Option<f64>,
    pub average_coverage_percent: Option<f64>,
    pub auto_fix_success_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceCheck {
    pub metrics: PerformanceMetrics,
    pub targets: PerformanceTargets,
    pub speed_ok: bool,
    pub coverage_ok: bool,
    pub auto_fix_ok: bool,
    /// Logical AND of the three checks.
    pub overall: bool,
}

pub struct WorkflowManager {
    workflows: RwLock<HashMap<WorkflowId, WorkflowExecution>>,
    targets: PerformanceTargets,
    events: EventBus,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn secs(wf: &WorkflowExecution) -> f64 {
    wf.duration().num_milliseconds() as f64 / 1000.0
}

impl WorkflowManager {
    pub fn new(targets: PerformanceTargets, events: EventBus) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            targets,
            events,
        }
    }

    pub fn targets(&self) -> &PerformanceTargets {
        &self.targets
    }

    /// Mint a `pending` workflow for `pr` and start tracking it.
    pub async fn create_workflow(&self, pr: &PrContext) -> WorkflowExecution {
        let wf = WorkflowExecution::new(pr);
        self.workflows
            .write()
            .await
            .insert(wf.id.clone(), wf.clone());
        wf
    }

    /// Track an existing execution, replacing any entry with the same id.
    pub async fn insert_workflow(&self, wf: WorkflowExecution) {
        self.workflows.write().await.insert(wf.id.clone(), wf);
    }

    async fn with_workflow<T>(
        &self,
        id: &WorkflowId,
        f: impl FnOnce(&mut WorkflowExecution) -> Result<T>,
    ) -> Result<T> {
        let mut workflows = self.workflows.write().await;
        let wf = workflows
            .get_mut(id)
            .ok_or_else(|| PrflowError::WorkflowNotFound(id.to_string()))?;
        f(wf)
    }

    /// Validate and apply a state change; terminal states set `completed_at`.
    pub async fn update_workflow_state(
        &self,
        id: &WorkflowId,
        state: WorkflowState,
    ) -> Result<WorkflowExecution> {
        let (transition, snapshot) = self
            .with_workflow(id, |wf| {
                let t = wf.transition_to(state)?;
                Ok((t, wf.clone()))
            })
            .await?;
        obs::emit_state_changed(id, transition.from, transition.to);
        self.events.publish(Notification::WorkflowStateChanged {
            workflow_id: id.clone(),
            from: transition.from,
            to: transition.to,
        });
        Ok(snapshot)
    }

    pub async fn add_workflow_error(
        &self,
        id: &WorkflowId,
        message: impl Into<String>,
        trace: Option<String>,
    ) -> Result<()> {
        let message = message.into();
        self.with_workflow(id, move |wf| {
            wf.record_error(message, trace);
            Ok(())
        })
        .await
    }

    /// Store the findings of the analysis pass.
    pub async fn record_results(
        &self,
        id: &WorkflowId,
        results: Vec<AnalysisResult>,
        coverage: AnalysisCoverage,
    ) -> Result<()> {
        self.with_workflow(id, move |wf| {
            wf.results = results;
            wf.coverage = Some(coverage);
            Ok(())
        })
        .await
    }

    pub async fn add_issue(&self, id: &WorkflowId, issue_id: String) -> Result<()> {
        self.with_workflow(id, move |wf| {
            wf.issue_ids.push(issue_id);
            Ok(())
        })
        .await
    }

    pub async fn record_auto_fix_attempt(&self, id: &WorkflowId) -> Result<()> {
        self.with_workflow(id, |wf| {
            wf.record_auto_fix_attempt();
            Ok(())
        })
        .await
    }

    pub async fn record_auto_fix_success(&self, id: &WorkflowId) -> Result<()> {
        self.with_workflow(id, |wf| {
            wf.auto_fix_successes = wf.auto_fix_successes.saturating_add(1);
            Ok(())
        })
        .await
    }

    pub async fn set_metadata(
        &self,
        id: &WorkflowId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        self.with_workflow(id, |wf| {
            wf.metadata.insert(key.to_string(), value);
            Ok(())
        })
        .await
    }

    /// Store the validation pass outcome.
    pub async fn record_validation(
        &self,
        id: &WorkflowId,
        improvement: Improvement,
        residual: Vec<AnalysisResult>,
    ) -> Result<()> {
        self.with_workflow(id, move |wf| {
            wf.improvement = Some(improvement);
            wf.residual_results = residual;
            Ok(())
        })
        .await
    }

    pub async fn get_workflow(&self, id: &WorkflowId) -> Option<WorkflowExecution> {
        self.workflows.read().await.get(id).cloned()
    }

    /// Newest first.
    pub async fn get_workflows_by_pr(&self, pr_id: &str) -> Vec<WorkflowExecution> {
        self.filtered(|wf| wf.pr_id == pr_id).await
    }

    pub async fn get_workflows_by_state(&self, state: WorkflowState) -> Vec<WorkflowExecution> {
        self.filtered(|wf| wf.state() == state).await
    }

    /// All non-terminal workflows.
    pub async fn get_active_workflows(&self) -> Vec<WorkflowExecution> {
        self.filtered(|wf| !wf.is_terminal()).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowExecution> {
        self.filtered(|_| true).await
    }

    async fn filtered(&self, keep: impl Fn(&WorkflowExecution) -> bool) -> Vec<WorkflowExecution> {
        let mut out: Vec<WorkflowExecution> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|wf| keep(wf))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }

    /// Elapsed time to completion, or to now for a running workflow.
    pub async fn get_workflow_duration(&self, id: &WorkflowId) -> Option<chrono::Duration> {
        self.workflows.read().await.get(id).map(|wf| wf.duration())
    }

    /// Drop terminal workflows that finished more than `max_age` ago.
    /// Returns how many were removed.
    pub async fn cleanup_old_workflows(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut workflows = self.workflows.write().await;
        let before = workflows.len();
        workflows.retain(|_, wf| !matches!(wf.completed_at(), Some(done) if done < cutoff));
        let removed = before - workflows.len();
        if removed > 0 {
            tracing::debug!(removed, "cleaned up old workflows");
        }
        removed
    }

    pub async fn remove_workflow(&self, id: &WorkflowId) -> Option<WorkflowExecution> {
        self.workflows.write().await.remove(id)
    }

    pub async fn get_workflow_statistics(&self) -> WorkflowStatistics {
        let workflows = self.workflows.read().await;
        let mut by_state = BTreeMap::new();
        for wf in workflows.values() {
            *by_state.entry(wf.state()).or_insert(0) += 1;
        }
        let terminal: Vec<&WorkflowExecution> =
            workflows.values().filter(|wf| wf.is_terminal()).collect();
        let completed = terminal
            .iter()
            .filter(|wf| wf.state() == WorkflowState::Completed)
            .count();

        WorkflowStatistics {
            total: workflows.len(),
            active: workflows.len() - terminal.len(),
            by_state,
            average_duration_secs: mean(terminal.iter().map(|wf| secs(wf))).unwrap_or(0.0),
            success_rate: if terminal.is_empty() {
                0.0
            } else {
                completed as f64 / terminal.len() as f64 * 100.0
            },
        }
    }

    pub async fn get_performance_metrics(&self) -> PerformanceMetrics {
        let workflows = self.workflows.read().await;
        let terminal: Vec<&WorkflowExecution> =
            workflows.values().filter(|wf| wf.is_terminal()).collect();
        let attempts: u64 = terminal
            .iter()
            .map(|wf| u64::from(wf.auto_fix_attempts()))
            .sum();
        let successes: u64 = terminal
            .iter()
            .map(|wf| u64::from(wf.auto_fix_successes))
            .sum();

        PerformanceMetrics {
            workflows_measured: terminal.len(),
            average_duration_secs: mean(terminal.iter().map(|wf| secs(wf))),
            average_findings_per_run: mean(terminal.iter().map(|wf| wf.results.len() as f64)),
            average_coverage_percent: mean(
                terminal
                    .iter()
                    .filter_map(|wf| wf.coverage.as_ref())
                    .map(|c| c.percent()),
            ),
            auto_fix_success_percent: (attempts > 0)
                .then(|| successes as f64 / attempts as f64 * 100.0),
        }
    }

    /// Compare metrics against targets. A metric without data passes.
    pub async fn check_performance_targets(&self) -> PerformanceCheck {
        let metrics = self.get_performance_metrics().await;
        let t = &self.targets;
        let speed_ok = metrics
            .average_duration_secs
            .map_or(true, |s| s <= t.target_speed_seconds);
        let coverage_ok = metrics
            .average_coverage_percent
            .map_or(true, |c| c >= t.target_coverage_percent);
        let auto_fix_ok = metrics
            .auto_fix_success_percent
            .map_or(true, |r| r >= t.target_auto_fix_percent);

        PerformanceCheck {
            targets: t.clone(),
            overall: speed_ok && coverage_ok && auto_fix_ok,
            speed_ok,
            coverage_ok,
            auto_fix_ok,
            metrics,
        }
    }
}
