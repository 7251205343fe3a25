//! Workflow driver: analyze, file issues, auto-fix, validate.
//!
//! One `process_pr` call drives one workflow through the four phases in
//! order. A phase error aborts the remaining phases and fails the
//! workflow; a single auto-fix error only skips that finding. Whatever the
//! outcome, the final workflow is saved exactly once.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use prflow_state::WorkflowStore;
use tracing::{debug, info, warn, Instrument};

use crate::config::WorkflowConfig;
use crate::domain::{
    AnalysisResult, AutoFixResult, GroupKey, Improvement, PrContext, PrflowError, Result, WorkflowExecution,
    WorkflowId, WorkflowState,
};
use crate::engine::AnalysisEngine;
use crate::events::{EventBus, Notification};
use crate::manager::WorkflowManager;
use crate::metrics::METRICS;
use crate::obs;
use crate::ports::{AutoFixAgent, ErrorRecovery, IssueTracker};
use crate::summary::group_results;

/// External collaborators the orchestrator calls.
#[derive(Clone)]
pub struct Collaborators {
    pub issues: Arc<dyn IssueTracker>,
    pub auto_fix: Arc<dyn AutoFixAgent>,
    pub recovery: Arc<dyn ErrorRecovery>,
    pub store: Arc<dyn WorkflowStore>,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Marks a PR key as running; released on drop.
struct InFlightGuard {
    set: InFlight,
    key: String,
}

impl InFlightGuard {
    fn acquire(set: &InFlight, key: &str) -> Result<Self> {
        let mut running = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(key.to_string()) {
            return Err(PrflowError::AlreadyRunning {
                pr_key: key.to_string(),
            });
        }
        Ok(Self {
            set: Arc::clone(set),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct Orchestrator {
    engine: Arc<AnalysisEngine>,
    manager: Arc<WorkflowManager>,
    collaborators: Collaborators,
    config: WorkflowConfig,
    events: EventBus,
    in_flight: InFlight,
}

impl Orchestrator {
    pub fn new(
        engine: Arc<AnalysisEngine>,
        manager: Arc<WorkflowManager>,
        collaborators: Collaborators,
        config: WorkflowConfig,
        events: EventBus,
    ) -> Self {
        Self {
            engine,
            manager,
            collaborators,
            config,
            events,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn engine(&self) -> &Arc<AnalysisEngine> {
        &self.engine
    }

    pub fn manager(&self) -> &Arc<WorkflowManager> {
        &self.manager
    }

    /// Drive one workflow for `pr` to a terminal state.
    ///
    /// Phase failures do not surface here: the returned workflow is in
    /// `failed` with the error recorded. `Err` is returned when the run
    /// could not start (`AlreadyRunning`), or when the workflow vanished
    /// before it could be marked `failed`.
    pub async fn process_pr(&self, pr: &PrContext) -> Result<WorkflowExecution> {
        let pr_key = pr.key();
        let _guard = if self.config.dedupe_concurrent_runs {
            Some(InFlightGuard::acquire(&self.in_flight, &pr_key)?)
        } else {
            None
        };

        let wf = self.manager.create_workflow(pr).await;
        let span = obs::workflow_span(&wf.id, &pr_key);
        self.drive(pr, wf.id).instrument(span).await
    }

    async fn drive(&self, pr: &PrContext, id: WorkflowId) -> Result<WorkflowExecution> {
        METRICS.inc_workflows_started();
        obs::emit_workflow_started(&id, &pr.key(), pr.files.len());

        let (wf, outcome) = match self.run_phases(pr, &id).await {
            Ok(wf) => (wf, Ok(())),
            Err(err) => (self.fail_workflow(&id, &err).await?, Err(err)),
        };

        match &outcome {
            Ok(()) => {
                METRICS.inc_workflows_completed();
                self.events.publish(Notification::WorkflowCompleted {
                    workflow_id: id.clone(),
                    improvement: wf.improvement,
                });
            }
            Err(err) => {
                METRICS.inc_workflows_failed();
                self.events.publish(Notification::WorkflowFailed {
                    workflow_id: id.clone(),
                    error: err.to_string(),
                });
            }
        }

        self.persist(&wf).await;
        obs::emit_workflow_finished(
            &id,
            wf.duration().num_milliseconds().max(0) as u64,
            wf.results.len(),
            outcome.is_ok(),
        );
        self.schedule_eviction(id);
        Ok(wf)
    }

    /// Runs the four phases and returns the `completed` snapshot.
    async fn run_phases(&self, pr: &PrContext, id: &WorkflowId) -> Result<WorkflowExecution> {
        self.analysis_phase(pr, id).await?;
        let sub_issues = self.issue_phase(pr, id).await?;
        self.auto_fix_phase(pr, id, &sub_issues).await?;
        self.validation_phase(pr, id).await?;
        self.manager
            .update_workflow_state(id, WorkflowState::Completed)
            .await
    }

    async fn snapshot(&self, id: &WorkflowId) -> Result<WorkflowExecution> {
        self.manager
            .get_workflow(id)
            .await
            .ok_or_else(|| PrflowError::WorkflowNotFound(id.to_string()))
    }

    async fn analysis_phase(&self, pr: &PrContext, id: &WorkflowId) -> Result<()> {
        self.manager
            .update_workflow_state(id, WorkflowState::Analyzing)
            .await?;
        let report = self.engine.analyze_all_detailed(pr).await?;
        let coverage = report.coverage();
        info!(
            findings = report.results.len(),
            modules = coverage.modules_run,
            failed_modules = coverage.modules_failed,
            "analysis phase finished"
        );
        self.manager
            .record_results(id, report.results, coverage)
            .await
    }

    /// Main issue first, then one sub-issue per `(type, module)` group.
    /// Returns the sub-issue id of each group.
    async fn issue_phase(
        &self,
        pr: &PrContext,
        id: &WorkflowId,
    ) -> Result<BTreeMap<GroupKey, String>> {
        self.manager
            .update_workflow_state(id, WorkflowState::CreatingIssues)
            .await?;
        let wf = self.snapshot(id).await?;
        let issues = &self.collaborators.issues;

        let main_id = issues.create_main_issue(pr, &wf.results).await?;
        self.manager.add_issue(id, main_id.clone()).await?;

        let mut sub_issues = BTreeMap::new();
        for (group, results) in group_results(&wf.results) {
            let sub_id = issues
                .create_sub_issue(&main_id, &group, &results, pr)
                .await?;
            debug!(group = %group, issue_id = %sub_id, findings = results.len(), "sub-issue created");
            self.manager.add_issue(id, sub_id.clone()).await?;
            sub_issues.insert(group, sub_id);
        }

        let index: BTreeMap<String, String> = sub_issues
            .iter()
            .map(|(g, i)| (g.to_string(), i.clone()))
            .collect();
        self.manager
            .set_metadata(id, "sub_issues", serde_json::to_value(index)?)
            .await?;
        Ok(sub_issues)
    }

    async fn auto_fix_phase(
        &self,
        pr: &PrContext,
        id: &WorkflowId,
        sub_issues: &BTreeMap<GroupKey, String>,
    ) -> Result<()> {
        self.manager
            .update_workflow_state(id, WorkflowState::AutoFixing)
            .await?;
        let wf = self.snapshot(id).await?;
        let fixable: Vec<&AnalysisResult> = wf.results.iter().filter(|r| r.auto_fixable).collect();
        if fixable.is_empty() {
            debug!("no auto-fixable findings");
            return Ok(());
        }

        for result in fixable {
            self.manager.record_auto_fix_attempt(id).await?;
            METRICS.inc_auto_fix_attempts();
            let sub_issue = sub_issues.get(&result.group_key()).map(String::as_str);
            match self.fix_one(pr, &wf, result).await {
                Ok(Some(fix)) => {
                    self.manager.record_auto_fix_success(id).await?;
                    METRICS.inc_auto_fix_successes();
                    self.report_fix(&wf, result, sub_issue, &fix).await;
                }
                Ok(None) => {}
                Err(err) => warn!(
                    finding = %result.id,
                    module = %result.module,
                    error = %err,
                    "auto-fix failed; continuing"
                ),
            }
        }
        Ok(())
    }

    /// Request one fix; `Some` only when the agent reports success.
    async fn fix_one(
        &self,
        pr: &PrContext,
        wf: &WorkflowExecution,
        result: &AnalysisResult,
    ) -> Result<Option<AutoFixResult>> {
        let fix = self
            .collaborators
            .auto_fix
            .request_auto_fix(result, pr, &wf.issue_ids)
            .await?;
        if !fix.success {
            info!(
                finding = %result.id,
                reason = fix.error.as_deref().unwrap_or("unspecified"),
                "auto-fix unsuccessful"
            );
            return Ok(None);
        }
        Ok(Some(fix))
    }

    /// Note a successful fix on the main issue and the group's sub-issue.
    /// The fix already counts; a failed update is only logged.
    async fn report_fix(
        &self,
        wf: &WorkflowExecution,
        result: &AnalysisResult,
        sub_issue: Option<&str>,
        fix: &AutoFixResult,
    ) {
        let targets = wf.main_issue_id().into_iter().chain(sub_issue);
        for issue_id in targets {
            if let Err(err) = self
                .collaborators
                .issues
                .update_issue_with_fix(issue_id, result, fix)
                .await
            {
                warn!(
                    finding = %result.id,
                    issue_id,
                    error = %err,
                    "could not record fix on issue"
                );
            }
        }
    }

    async fn validation_phase(&self, pr: &PrContext, id: &WorkflowId) -> Result<()> {
        self.manager
            .update_workflow_state(id, WorkflowState::Validating)
            .await?;
        let wf = self.snapshot(id).await?;
        let remaining = self.engine.analyze_all(pr).await?;
        let improvement = Improvement::measure(wf.results.len(), remaining.len());
        info!(
            original = improvement.original,
            remaining = improvement.remaining,
            fixed = improvement.fixed,
            "validation phase finished"
        );

        if let Some(main_id) = wf.main_issue_id() {
            self.collaborators
                .issues
                .update_main_issue_with_validation(main_id, &improvement, &remaining)
                .await?;
        }
        self.manager
            .record_validation(id, improvement, remaining)
            .await
    }

    /// Record the error, move to `failed` and hand off to error recovery.
    ///
    /// Returns the `failed` snapshot taken at the transition, so the caller
    /// can persist it even if the in-memory entry is evicted while the
    /// recovery hook runs. Bookkeeping and hook errors are logged only.
    async fn fail_workflow(
        &self,
        id: &WorkflowId,
        err: &PrflowError,
    ) -> Result<WorkflowExecution> {
        warn!(error = %err, "workflow failed");
        if let Err(e) = self
            .manager
            .add_workflow_error(id, err.to_string(), Some(format!("{err:?}")))
            .await
        {
            warn!(error = %e, "could not record workflow error");
        }
        let wf = match self
            .manager
            .update_workflow_state(id, WorkflowState::Failed)
            .await
        {
            Ok(wf) => wf,
            Err(e) => {
                warn!(error = %e, "could not mark workflow failed");
                self.snapshot(id).await?
            }
        };

        if let Err(e) = self
            .collaborators
            .recovery
            .handle_workflow_failure(&wf, err)
            .await
        {
            warn!(error = %e, "error recovery hook failed");
        }
        Ok(wf)
    }

    async fn persist(&self, wf: &WorkflowExecution) {
        let saved = match wf.to_record() {
            Ok(record) => self
                .collaborators
                .store
                .save_workflow(record)
                .await
                .map_err(PrflowError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            obs::emit_persist_error(&wf.id, &e);
        }
    }

    fn schedule_eviction(&self, id: WorkflowId) {
        let Some(secs) = self.config.active_retention_secs else {
            return;
        };
        let manager = Arc::clone(&self.manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if manager.remove_workflow(&id).await.is_some() {
                debug!(workflow_id = %id, "evicted finished workflow");
            }
        });
    }

    /// Look the workflow up in memory, then in the store.
    pub async fn get_workflow_status(&self, id: &WorkflowId) -> Result<Option<WorkflowExecution>> {
        if let Some(wf) = self.manager.get_workflow(id).await {
            return Ok(Some(wf));
        }
        match self
            .collaborators
            .store
            .get_workflow(id.as_str())
            .await?
        {
            Some(record) => Ok(Some(WorkflowExecution::from_record(record)?)),
            None => Ok(None),
        }
    }
}
