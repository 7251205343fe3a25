//! Structured observability hooks for workflow lifecycle events.
//!
//! Events are emitted at `info!` level (filter with `PRFLOW_LOG` or
//! `RUST_LOG`). Every event carries an `event` field so log pipelines can
//! match on it without parsing messages.

use tracing::{info, warn};

use crate::domain::{WorkflowId, WorkflowState};

/// Span tagged with the workflow id and PR key.
///
/// Attach it to the workflow future with `tracing::Instrument` so it stays
/// correct across `.await` points.
pub fn workflow_span(workflow_id: &WorkflowId, pr_key: &str) -> tracing::Span {
    tracing::info_span!("prflow.workflow", workflow_id = %workflow_id, pr = %pr_key)
}

pub fn emit_workflow_started(workflow_id: &WorkflowId, pr_key: &str, files: usize) {
    info!(
        event = "workflow.started",
        workflow_id = %workflow_id,
        pr = %pr_key,
        files = files,
    );
}

pub fn emit_state_changed(workflow_id: &WorkflowId, from: WorkflowState, to: WorkflowState) {
    info!(
        event = "workflow.state_changed",
        workflow_id = %workflow_id,
        from = %from,
        to = %to,
    );
}

/// Emit event: workflow finished with duration, finding count and outcome.
pub fn emit_workflow_finished(
    workflow_id: &WorkflowId,
    duration_ms: u64,
    findings: usize,
    success: bool,
) {
    info!(
        event = "workflow.finished",
        workflow_id = %workflow_id,
        duration_ms = duration_ms,
        findings = findings,
        success = success,
    );
}

pub fn emit_module_failed(module: &str, error: &dyn std::fmt::Display, elapsed_ms: u64) {
    warn!(
        event = "module.failed",
        module = %module,
        error = %error,
        elapsed_ms = elapsed_ms,
    );
}

/// Emit event: the workflow record could not be persisted (warning level).
pub fn emit_persist_error(workflow_id: &WorkflowId, error: &dyn std::fmt::Display) {
    warn!(event = "workflow.persist_error", workflow_id = %workflow_id, error = %error);
}
