//! Configuration surface for the engine, the workflow driver and the
//! performance targets.
//!
//! Loaded from TOML, then overridden by `PRFLOW_*` environment variables.
//! Every field has a default so an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Category, PrflowError, Result};
use crate::module::ModuleSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrflowConfig {
    pub analysis: AnalysisConfig,
    /// Per-module settings, keyed by module name.
    pub modules: BTreeMap<String, ModuleSettings>,
    pub workflow: WorkflowConfig,
    pub targets: PerformanceTargets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub parallel: bool,
    pub max_concurrent_analyses: usize,
    /// Per-module deadline in milliseconds.
    pub timeout_ms: u64,
    pub categories: CategoriesConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            max_concurrent_analyses: 5,
            timeout_ms: 300_000,
            categories: CategoriesConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoriesConfig {
    #[serde(rename = "static")]
    pub static_analysis: CategoryConfig,
    pub dynamic: CategoryConfig,
    pub security: CategoryConfig,
    pub performance: CategoryConfig,
    pub compliance: CategoryConfig,
}

impl CategoriesConfig {
    pub fn get(&self, category: Category) -> &CategoryConfig {
        match category {
            Category::Static => &self.static_analysis,
            Category::Dynamic => &self.dynamic,
            Category::Security => &self.security,
            Category::Performance => &self.performance,
            Category::Compliance => &self.compliance,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut CategoryConfig {
        match category {
            Category::Static => &mut self.static_analysis,
            Category::Dynamic => &mut self.dynamic,
            Category::Security => &mut self.security,
            Category::Performance => &mut self.performance,
            Category::Compliance => &mut self.compliance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfig {
    pub enabled: bool,
    /// Restrict the category to these module names. `None` keeps all.
    pub modules: Option<Vec<String>>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            modules: None,
        }
    }
}

impl CategoryConfig {
    pub fn admits(&self, module: &str) -> bool {
        self.enabled
            && self
                .modules
                .as_ref()
                .map_or(true, |names| names.iter().any(|n| n == module))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Grace period before a finished workflow leaves the in-memory set.
    /// `None` keeps finished workflows until `cleanup_old_workflows`.
    pub active_retention_secs: Option<u64>,
    /// Reject a second run for a PR while one is still in flight.
    pub dedupe_concurrent_runs: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            active_retention_secs: Some(60),
            dedupe_concurrent_runs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceTargets {
    pub target_speed_seconds: f64,
    pub target_coverage_percent: f64,
    pub target_auto_fix_percent: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            target_speed_seconds: 300.0,
            target_coverage_percent: 90.0,
            target_auto_fix_percent: 50.0,
        }
    }
}

impl PrflowConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| PrflowError::Config(e.to_string()))
    }

    /// Load from an optional file, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    PrflowError::Config(format!("failed to read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PRFLOW_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PRFLOW_PARALLEL") {
            self.analysis.parallel = parse_env("PRFLOW_PARALLEL", &v)?;
        }
        if let Some(v) = lookup("PRFLOW_MAX_CONCURRENT_ANALYSES") {
            self.analysis.max_concurrent_analyses =
                parse_env("PRFLOW_MAX_CONCURRENT_ANALYSES", &v)?;
        }
        if let Some(v) = lookup("PRFLOW_ANALYSIS_TIMEOUT_MS") {
            self.analysis.timeout_ms = parse_env("PRFLOW_ANALYSIS_TIMEOUT_MS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.analysis.max_concurrent_analyses == 0 {
            return Err(PrflowError::Config(
                "analysis.max_concurrent_analyses must be at least 1".to_string(),
            ));
        }
        if self.analysis.timeout_ms == 0 {
            return Err(PrflowError::Config(
                "analysis.timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PrflowError::Config(format!("invalid value for {key}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_typical_deployment() {
        let config = PrflowConfig::default();
        assert!(config.analysis.parallel);
        assert_eq!(config.analysis.max_concurrent_analyses, 5);
        assert_eq!(config.analysis.timeout_ms, 300_000);
        assert_eq!(config.workflow.active_retention_secs, Some(60));
        assert!(Category::ALL
            .iter()
            .all(|c| config.analysis.categories.get(*c).enabled));
    }

    #[test]
    fn parses_category_subsets_and_module_settings() {
        let config = PrflowConfig::from_toml_str(
            r#"
            [analysis]
            parallel = false
            timeout_ms = 1000

            [analysis.categories.static]
            modules = ["todo_marker"]

            [analysis.categories.performance]
            enabled = false

            [modules.oversized_change]
            max_additions = 250

            [targets]
            target_speed_seconds = 30.0
            "#,
        )
        .unwrap();

        assert!(!config.analysis.parallel);
        assert_eq!(config.analysis.max_concurrent_analyses, 5);
        let statics = config.analysis.categories.get(Category::Static);
        assert!(statics.admits("todo_marker"));
        assert!(!statics.admits("debug_statement"));
        assert!(!config
            .analysis
            .categories
            .get(Category::Performance)
            .admits("anything"));
        assert_eq!(
            config.modules["oversized_change"].u64_or("max_additions", 0),
            250
        );
        assert_eq!(config.targets.target_speed_seconds, 30.0);
        assert_eq!(config.targets.target_auto_fix_percent, 50.0);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = PrflowConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "PRFLOW_PARALLEL" => Some("false".to_string()),
                "PRFLOW_ANALYSIS_TIMEOUT_MS" => Some("250".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(!config.analysis.parallel);
        assert_eq!(config.analysis.timeout_ms, 250);
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let mut config = PrflowConfig::default();
        let err = config
            .apply_env_overrides(|key| {
                (key == "PRFLOW_MAX_CONCURRENT_ANALYSES").then(|| "many".to_string())
            })
            .unwrap_err();
        assert!(matches!(err, PrflowError::Config(_)));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = PrflowConfig::default();
        config.analysis.max_concurrent_analyses = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prflow.toml");
        std::fs::write(&path, "[workflow]\ndedupe_concurrent_runs = false\n").unwrap();
        let config = PrflowConfig::load(Some(&path)).unwrap();
        assert!(!config.workflow.dedupe_concurrent_runs);
    }
}
