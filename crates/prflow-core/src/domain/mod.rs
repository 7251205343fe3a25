//! Domain models for prflow.
//!
//! Canonical definitions for the core entities:
//! - `AnalysisResult`: one immutable finding produced by an analysis module
//! - `PrContext`: read-only snapshot of the pull request under analysis
//! - `WorkflowExecution`: one analyze -> issue -> fix -> validate run
//! - `AutoFixResult`: outcome of a single remediation attempt

pub mod error;
pub mod finding;
pub mod fix;
pub mod pr_context;
pub mod workflow;

pub use error::{EngineError, PrflowError, Result};
pub use finding::{AnalysisResult, Category, FindingId, GroupKey, Location, Severity};
pub use fix::{AutoFixResult, ChangeType, FileChange};
pub use pr_context::{ChangedFile, CommitInfo, FileStatus, PrContext};
pub use workflow::{
    AnalysisCoverage, Improvement, StateTransition, WorkflowErrorRecord, WorkflowExecution,
    WorkflowId, WorkflowState,
};
