//! Built-in analysis modules.
//!
//! Simple pattern matchers over the added lines of each file's patch.
//! Deployments register their own modules next to these.

pub mod debug_statement;
pub mod diff;
pub mod hardcoded_secret;
pub mod oversized_change;
pub mod todo_marker;

use std::sync::Arc;

use crate::module::AnalysisModule;

pub use debug_statement::DebugStatementModule;
pub use hardcoded_secret::HardcodedSecretModule;
pub use oversized_change::OversizedChangeModule;
pub use todo_marker::TodoMarkerModule;

/// Every built-in module, in registration order.
pub fn builtin_modules() -> Vec<Arc<dyn AnalysisModule>> {
    vec![
        Arc::new(TodoMarkerModule::new()),
        Arc::new(DebugStatementModule::new()),
        Arc::new(HardcodedSecretModule::new()),
        Arc::new(OversizedChangeModule),
    ]
}
