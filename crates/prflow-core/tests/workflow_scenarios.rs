//! End-to-end orchestrator scenarios against in-memory collaborators.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use prflow_core::events::drain;
use prflow_core::fakes::{
    sample_pr, RecordingIssueTracker, RecordingRecovery, ScriptedAutoFixAgent, ScriptedModule,
    TrackerCall,
};
use prflow_core::{
    AnalysisConfig, AnalysisEngine, AnalysisModule, AnalysisResult, AutoFixAgent, Category,
    Collaborators, EventBus, ModuleAutoFixAgent, Notification, Orchestrator, PerformanceTargets,
    PrflowError, Severity, WorkflowConfig, WorkflowManager, WorkflowState,
};
use prflow_state::MemoryWorkflowStore;

struct Harness {
    orchestrator: Orchestrator,
    tracker: Arc<RecordingIssueTracker>,
    recovery: Arc<RecordingRecovery>,
    store: Arc<MemoryWorkflowStore>,
    events: EventBus,
}

enum Fixer {
    Agent(Arc<dyn AutoFixAgent>),
    Modules,
}

fn harness(
    modules: Vec<Arc<dyn AnalysisModule>>,
    fixer: Fixer,
    workflow: WorkflowConfig,
) -> Harness {
    let events = EventBus::new();
    let engine = Arc::new(AnalysisEngine::new(
        AnalysisConfig::default(),
        BTreeMap::new(),
        events.clone(),
    ));
    engine.initialize(modules).unwrap();
    let manager = Arc::new(WorkflowManager::new(
        PerformanceTargets::default(),
        events.clone(),
    ));

    let tracker = Arc::new(RecordingIssueTracker::new());
    let recovery = Arc::new(RecordingRecovery::new());
    let store = Arc::new(MemoryWorkflowStore::new());
    let auto_fix: Arc<dyn AutoFixAgent> = match fixer {
        Fixer::Agent(agent) => agent,
        Fixer::Modules => Arc::new(ModuleAutoFixAgent::new(engine.clone())),
    };

    let orchestrator = Orchestrator::new(
        engine,
        manager,
        Collaborators {
            issues: tracker.clone(),
            auto_fix,
            recovery: recovery.clone(),
            store: store.clone(),
        },
        workflow,
        events.clone(),
    );
    Harness {
        orchestrator,
        tracker,
        recovery,
        store,
        events,
    }
}

fn no_eviction() -> WorkflowConfig {
    WorkflowConfig {
        active_retention_secs: None,
        ..WorkflowConfig::default()
    }
}

fn finding(module: &str, title: &str, line: u32, fixable: bool) -> AnalysisResult {
    AnalysisResult::new(module, Category::Static, Severity::Medium, title, "d")
        .at("src/retry.rs", Some(line), None)
        .auto_fixable(fixable)
}

/// One module with two findings (one fixable), one module with none.
fn two_modules() -> Vec<Arc<dyn AnalysisModule>> {
    vec![
        Arc::new(ScriptedModule::new("lint", Category::Static).with_findings(vec![
            finding("lint", "unused import", 1, true),
            finding("lint", "shadowed name", 2, false),
        ])),
        Arc::new(ScriptedModule::new("secrets", Category::Security)),
    ]
}

#[tokio::test]
async fn three_files_two_modules_completes() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    let pr = sample_pr();
    assert_eq!(pr.files.len(), 3);

    let wf = h.orchestrator.process_pr(&pr).await.unwrap();

    assert_eq!(wf.state(), WorkflowState::Completed);
    assert!(wf.completed_at().is_some());
    assert_eq!(wf.results.len(), 2);
    assert_eq!(wf.issue_ids.len(), 2);
    assert_eq!(wf.auto_fix_attempts(), 1);
    assert_eq!(wf.auto_fix_successes, 1);
    assert!(wf.errors.is_empty());
    assert_eq!(h.store.save_count(), 1);

    let states: Vec<WorkflowState> = wf.transitions().iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            WorkflowState::Analyzing,
            WorkflowState::CreatingIssues,
            WorkflowState::AutoFixing,
            WorkflowState::Validating,
            WorkflowState::Completed,
        ]
    );
}

#[tokio::test]
async fn main_issue_precedes_sub_issues_and_fixes_update_both() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    let calls = h.tracker.calls();

    assert!(matches!(&calls[0], TrackerCall::CreateMain { id, results: 2 } if id == "ISSUE-1"));
    assert!(matches!(
        &calls[1],
        TrackerCall::CreateSub { id, parent_id, results: 2, .. } if id == "ISSUE-2" && parent_id == "ISSUE-1"
    ));
    let fix_targets: Vec<&str> = calls
        .iter()
        .filter_map(|c| match c {
            TrackerCall::FixUpdate { issue_id, success: true, .. } => Some(issue_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(fix_targets, vec!["ISSUE-1", "ISSUE-2"]);
    assert!(matches!(calls.last(), Some(TrackerCall::Validation { issue_id, .. }) if issue_id == "ISSUE-1"));
    assert_eq!(
        wf.metadata["sub_issues"],
        serde_json::json!({ "static/lint": "ISSUE-2" })
    );
}

#[tokio::test]
async fn rejected_main_issue_fails_workflow_and_still_saves_once() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.tracker.fail_main(true);
    let mut rx = h.events.subscribe();

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    assert_eq!(wf.state(), WorkflowState::Failed);
    assert!(wf.completed_at().is_some());
    assert_eq!(wf.errors.len(), 1);
    assert!(wf.errors[0].message.contains("issue tracker unavailable"));
    assert!(wf.errors[0].trace.is_some());
    assert_eq!(wf.results.len(), 2, "partial results are kept");
    assert!(wf.issue_ids.is_empty());
    assert_eq!(wf.auto_fix_attempts(), 0);
    assert_eq!(h.store.save_count(), 1);

    let seen = h.recovery.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, wf.id.to_string());

    let failed_events = drain(&mut rx)
        .into_iter()
        .filter(|n| matches!(n, Notification::WorkflowFailed { .. }))
        .count();
    assert_eq!(failed_events, 1);
}

#[tokio::test]
async fn auto_fix_errors_do_not_stop_the_loop() {
    let modules: Vec<Arc<dyn AnalysisModule>> = vec![Arc::new(
        ScriptedModule::new("lint", Category::Static).with_findings(vec![
            finding("lint", "a", 1, true),
            finding("lint", "b", 2, true),
            finding("lint", "c", 3, true),
        ]),
    )];
    let agent = Arc::new(ScriptedAutoFixAgent::erroring("agent offline"));
    let h = harness(modules, Fixer::Agent(agent.clone()), no_eviction());

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.auto_fix_attempts(), 3);
    assert_eq!(wf.auto_fix_successes, 0);
    assert_eq!(agent.requests().len(), 3);
    assert!(!h
        .tracker
        .calls()
        .iter()
        .any(|c| matches!(c, TrackerCall::FixUpdate { .. })));
}

#[tokio::test]
async fn unsuccessful_fix_is_not_reported_to_issues() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::unsuccessful("patch did not apply"))),
        no_eviction(),
    );
    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    assert_eq!(wf.auto_fix_attempts(), 1);
    assert_eq!(wf.auto_fix_successes, 0);
    assert!(!h
        .tracker
        .calls()
        .iter()
        .any(|c| matches!(c, TrackerCall::FixUpdate { .. })));
}

#[tokio::test]
async fn no_fixable_findings_still_passes_through_auto_fixing() {
    let modules: Vec<Arc<dyn AnalysisModule>> = vec![Arc::new(
        ScriptedModule::new("lint", Category::Static)
            .with_findings(vec![finding("lint", "a", 1, false)]),
    )];
    let agent = Arc::new(ScriptedAutoFixAgent::succeeding());
    let h = harness(modules, Fixer::Agent(agent.clone()), no_eviction());

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    assert_eq!(wf.state(), WorkflowState::Completed);
    assert!(wf
        .transitions()
        .iter()
        .any(|t| t.to == WorkflowState::AutoFixing));
    assert_eq!(wf.auto_fix_attempts(), 0);
    assert!(agent.requests().is_empty());
}

#[tokio::test]
async fn module_fixes_show_up_as_improvement() {
    let modules: Vec<Arc<dyn AnalysisModule>> = vec![Arc::new(
        ScriptedModule::new("lint", Category::Static)
            .with_auto_fix()
            .with_findings(vec![
                finding("lint", "fixable", 1, true),
                finding("lint", "manual", 2, false),
            ]),
    )];
    let h = harness(modules, Fixer::Modules, no_eviction());

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    let improvement = wf.improvement.expect("validation ran");
    assert_eq!(improvement.original, 2);
    assert_eq!(improvement.remaining, 1);
    assert_eq!(improvement.fixed, 1);
    assert_eq!(improvement.percentage, 50.0);
    assert_eq!(wf.residual_results.len(), 1);
    assert_eq!(wf.residual_results[0].title, "manual");
    assert!(h.tracker.calls().iter().any(|c| matches!(
        c,
        TrackerCall::Validation { remaining: 1, .. }
    )));
}

#[tokio::test]
async fn uninitialized_engine_fails_in_analysis() {
    let events = EventBus::new();
    let engine = Arc::new(AnalysisEngine::new(
        AnalysisConfig::default(),
        BTreeMap::new(),
        events.clone(),
    ));
    let manager = Arc::new(WorkflowManager::new(
        PerformanceTargets::default(),
        events.clone(),
    ));
    let store = Arc::new(MemoryWorkflowStore::new());
    let orchestrator = Orchestrator::new(
        engine.clone(),
        manager,
        Collaborators {
            issues: Arc::new(RecordingIssueTracker::new()),
            auto_fix: Arc::new(ModuleAutoFixAgent::new(engine)),
            recovery: Arc::new(prflow_core::RecoveryPlanner::default()),
            store: store.clone(),
        },
        no_eviction(),
        events,
    );

    let wf = orchestrator.process_pr(&sample_pr()).await.unwrap();
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.transitions()[0].to, WorkflowState::Analyzing);
    assert!(wf.errors[0].message.contains("not initialized"));
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn storage_failure_does_not_fail_the_workflow() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.store.fail_saves(true);
    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(h.store.save_count(), 1, "one attempt, not retried");
    assert!(h
        .orchestrator
        .get_workflow_status(&wf.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn notifications_follow_the_phase_order() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    let mut rx = h.events.subscribe();
    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    let seen = drain(&mut rx);
    let changes: Vec<(WorkflowState, WorkflowState)> = seen
        .iter()
        .filter_map(|n| match n {
            Notification::WorkflowStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(changes.len(), 5);
    assert_eq!(changes[0], (WorkflowState::Pending, WorkflowState::Analyzing));
    assert_eq!(changes[4], (WorkflowState::Validating, WorkflowState::Completed));
    assert!(matches!(
        seen.last(),
        Some(Notification::WorkflowCompleted { workflow_id, .. }) if *workflow_id == wf.id
    ));
}

fn slow_module() -> Vec<Arc<dyn AnalysisModule>> {
    vec![Arc::new(
        ScriptedModule::new("slow", Category::Static).with_delay(Duration::from_millis(50)),
    )]
}

#[tokio::test(start_paused = true)]
async fn concurrent_run_for_same_pr_is_rejected() {
    let h = harness(
        slow_module(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    let pr = sample_pr();

    let (first, second) = tokio::join!(h.orchestrator.process_pr(&pr), async {
        tokio::task::yield_now().await;
        h.orchestrator.process_pr(&pr).await
    });

    assert_eq!(first.unwrap().state(), WorkflowState::Completed);
    assert!(matches!(second, Err(PrflowError::AlreadyRunning { pr_key }) if pr_key == "acme/api#42"));

    // The guard is released once the first run finishes.
    let again = h.orchestrator.process_pr(&pr).await.unwrap();
    assert_eq!(again.state(), WorkflowState::Completed);
}

#[tokio::test(start_paused = true)]
async fn dedupe_can_be_switched_off() {
    let h = harness(
        slow_module(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        WorkflowConfig {
            active_retention_secs: None,
            dedupe_concurrent_runs: false,
        },
    );
    let pr = sample_pr();

    let (first, second) = tokio::join!(
        h.orchestrator.process_pr(&pr),
        h.orchestrator.process_pr(&pr)
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first.id, second.id);
    assert_eq!(h.store.save_count(), 2);
    assert_eq!(
        h.orchestrator
            .manager()
            .get_workflows_by_pr(&pr.id)
            .await
            .len(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn finished_workflow_is_evicted_but_still_queryable() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        WorkflowConfig {
            active_retention_secs: Some(60),
            dedupe_concurrent_runs: true,
        },
    );
    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    let manager = h.orchestrator.manager();
    assert!(manager.get_workflow(&wf.id).await.is_some());

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(manager.get_workflow(&wf.id).await.is_none());
    let status = h
        .orchestrator
        .get_workflow_status(&wf.id)
        .await
        .unwrap()
        .expect("persisted workflow");
    assert_eq!(status.state(), WorkflowState::Completed);
    assert_eq!(status.issue_ids, wf.issue_ids);
}

#[tokio::test]
async fn recovery_hook_errors_are_swallowed() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.tracker.fail_sub(true);
    h.recovery.fail(true);

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(wf.issue_ids, vec!["ISSUE-1".to_string()]);
    assert_eq!(h.recovery.seen().len(), 1);
    assert_eq!(h.store.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_workflow_is_saved_even_if_cleaned_up_during_recovery() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.tracker.fail_main(true);
    h.recovery.delay(Duration::from_millis(50));
    let manager = h.orchestrator.manager().clone();

    let pr = sample_pr();
    let (wf, removed) = tokio::join!(h.orchestrator.process_pr(&pr), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        manager.cleanup_old_workflows(chrono::Duration::zero()).await
    });

    let wf = wf.unwrap();
    assert_eq!(removed, 1, "cleanup ran while the hook was pending");
    assert_eq!(wf.state(), WorkflowState::Failed);
    assert_eq!(h.recovery.seen().len(), 1);
    assert_eq!(h.store.save_count(), 1);

    assert!(manager.get_workflow(&wf.id).await.is_none());
    let status = h
        .orchestrator
        .get_workflow_status(&wf.id)
        .await
        .unwrap()
        .expect("persisted workflow");
    assert_eq!(status.state(), WorkflowState::Failed);
    assert_eq!(status.errors.len(), 1);
}

#[tokio::test]
async fn fix_counts_even_when_issue_update_fails() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.tracker.fail_fix_updates(true);

    let wf = h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    assert_eq!(wf.state(), WorkflowState::Completed);
    assert_eq!(wf.auto_fix_attempts(), 1);
    assert_eq!(wf.auto_fix_successes, 1);
    assert!(!h
        .tracker
        .calls()
        .iter()
        .any(|c| matches!(c, TrackerCall::FixUpdate { .. })));
}

#[tokio::test]
async fn manager_reports_targets_after_runs() {
    let h = harness(
        two_modules(),
        Fixer::Agent(Arc::new(ScriptedAutoFixAgent::succeeding())),
        no_eviction(),
    );
    h.orchestrator.process_pr(&sample_pr()).await.unwrap();

    let check = h.orchestrator.manager().check_performance_targets().await;
    assert_eq!(check.metrics.workflows_measured, 1);
    assert_eq!(check.metrics.average_findings_per_run, Some(2.0));
    assert_eq!(check.metrics.auto_fix_success_percent, Some(100.0));
    assert_eq!(check.metrics.average_coverage_percent, Some(100.0));
    assert!(check.overall);
}
