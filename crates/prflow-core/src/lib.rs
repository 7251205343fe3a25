//! prflow core library
//!
//! Pull request analysis and remediation: an analysis engine running
//! pluggable modules under per-module deadlines, a workflow manager that
//! owns workflow state, and an orchestrator that drives each PR through
//! analyze, issue creation, auto-fix and validation.

pub mod config;
pub mod domain;
pub mod engine;
pub mod events;
pub mod fakes;
pub mod manager;
pub mod metrics;
pub mod module;
pub mod modules;
pub mod obs;
pub mod orchestrator;
pub mod ports;
pub mod recovery;
pub mod reporting;
pub mod summary;
pub mod telemetry;

pub use config::{
    AnalysisConfig, CategoriesConfig, CategoryConfig, PerformanceTargets, PrflowConfig,
    WorkflowConfig,
};
pub use domain::{
    AnalysisCoverage, AnalysisResult, AutoFixResult, Category, ChangeType, ChangedFile,
    CommitInfo, EngineError, FileChange, FileStatus, FindingId, GroupKey, Improvement, Location,
    PrContext, PrflowError, Result, Severity, StateTransition, WorkflowErrorRecord,
    WorkflowExecution, WorkflowId, WorkflowState,
};
pub use engine::{
    AnalysisEngine, AnalysisReport, EngineStatistics, ModuleInfo, ModuleOutcome, ModuleRun,
};
pub use events::{EventBus, Notification};
pub use manager::{PerformanceCheck, PerformanceMetrics, WorkflowManager, WorkflowStatistics};
pub use module::{AnalysisModule, ModuleError, ModuleSettings};
pub use modules::builtin_modules;
pub use orchestrator::{Collaborators, Orchestrator};
pub use ports::{AutoFixAgent, ErrorRecovery, IssueTracker, ModuleAutoFixAgent};
pub use recovery::{FailureClass, RecoveryAction, RecoveryDecision, RecoveryPlanner, RecoveryPolicy};
pub use reporting::MarkdownIssueTracker;
pub use summary::{group_results, FindingSummary};

pub use prflow_state::{MemoryWorkflowStore, SurrealWorkflowStore, WorkflowRecord, WorkflowStore};
