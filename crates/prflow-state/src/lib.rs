//! prflow-state: persistence for workflow records
//!
//! This crate is the storage layer of prflow. It knows nothing about
//! analysis modules or pull requests beyond the identifiers it indexes on;
//! the full workflow travels as an opaque JSON payload.
//!
//! ## Key Components
//!
//! - `WorkflowStore`: backend-agnostic save/load contract
//! - `MemoryWorkflowStore`: in-memory fake for tests
//! - `SurrealWorkflowStore`: SurrealDB backend (memory, local file or remote)

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::StorageError;
pub use fakes::MemoryWorkflowStore;
pub use storage_traits::{StorageResult, WorkflowRecord, WorkflowStore};
pub use surreal_store::SurrealWorkflowStore;
