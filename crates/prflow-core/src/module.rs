//! Analysis module contract.
//!
//! Every pluggable analysis unit implements [`AnalysisModule`]. The engine
//! owns registration, deadlines and failure isolation; a module only has to
//! turn a PR snapshot into findings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{AnalysisResult, AutoFixResult, Category, PrContext};

/// Free-form per-module settings from the `[modules.<name>]` config table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleSettings(pub BTreeMap<String, serde_json::Value>);

impl ModuleSettings {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Module execution error
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("analysis failed: {0}")]
    Failed(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("auto-fix is not supported")]
    Unsupported,
}

/// Trait that all analysis modules must implement
#[async_trait]
pub trait AnalysisModule: Send + Sync {
    /// Stable module name; findings carry it in `AnalysisResult::module`.
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    /// Semantic version string.
    fn version(&self) -> &str;

    /// Produce findings for the pull request.
    ///
    /// Recoverable problems (an unreadable patch, say) should yield zero
    /// findings rather than an error.
    async fn analyze(
        &self,
        pr: &PrContext,
        settings: &ModuleSettings,
    ) -> Result<Vec<AnalysisResult>, ModuleError>;

    /// Whether this module could remediate `result`.
    fn can_auto_fix(&self, _result: &AnalysisResult) -> bool {
        false
    }

    /// Whether `auto_fix` is implemented at all.
    fn supports_auto_fix(&self) -> bool {
        false
    }

    async fn auto_fix(
        &self,
        _result: &AnalysisResult,
        _pr: &PrContext,
    ) -> Result<AutoFixResult, ModuleError> {
        Err(ModuleError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_accessors_fall_back_to_defaults() {
        let settings: ModuleSettings = serde_json::from_value(serde_json::json!({
            "max_additions": 120,
            "strict": true,
            "markers": ["TODO", "HACK", 3]
        }))
        .unwrap();

        assert_eq!(settings.u64_or("max_additions", 1), 120);
        assert_eq!(settings.u64_or("missing", 9), 9);
        assert!(settings.bool_or("strict", false));
        assert_eq!(settings.string_list("markers"), vec!["TODO", "HACK"]);
        assert!(settings.string_list("missing").is_empty());
    }
}
