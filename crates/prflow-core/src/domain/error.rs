//! Domain-level error taxonomy for prflow.

use crate::domain::workflow::WorkflowState;

/// Errors raised by the analysis engine.
///
/// Module-level variants (`ModuleFailed`, `ModuleTimedOut`, `ModulePanicked`)
/// are recovered inside the engine during analysis; they only escape from
/// `request_auto_fix`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("analysis engine already initialized; call reset() before initializing again")]
    AlreadyInitialized,

    #[error("analysis engine is not initialized")]
    NotInitialized,

    #[error("unknown analysis module: {0}")]
    UnknownModule(String),

    #[error("module {module} does not support auto-fix")]
    AutoFixUnsupported { module: String },

    #[error("module {module} failed: {message}")]
    ModuleFailed { module: String, message: String },

    #[error("module {module} timed out after {timeout_ms}ms")]
    ModuleTimedOut { module: String, timeout_ms: u64 },

    #[error("module {module} panicked")]
    ModulePanicked { module: String },
}

/// prflow domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PrflowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("invalid state transition for workflow {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        workflow_id: String,
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("a workflow for {pr_key} is already running")]
    AlreadyRunning { pr_key: String },

    #[error("issue tracker error: {0}")]
    IssueTracker(String),

    #[error("auto-fix error: {0}")]
    AutoFix(String),

    #[error("storage error: {0}")]
    Storage(#[from] prflow_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for prflow domain operations.
pub type Result<T> = std::result::Result<T, PrflowError>;
