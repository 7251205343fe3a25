//! Analysis engine: module registry plus bounded-concurrency execution.
//!
//! Every module invocation is raced against the configured deadline and
//! wrapped in `catch_unwind`. A module that errors, panics or times out
//! contributes zero findings and a `ModuleFailed` notification; it never
//! aborts its siblings.

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{AnalysisConfig, PrflowConfig};
use crate::domain::{
    AnalysisCoverage, AnalysisResult, AutoFixResult, Category, EngineError, PrContext,
};
use crate::events::{EventBus, Notification};
use crate::metrics::METRICS;
use crate::module::{AnalysisModule, ModuleError, ModuleSettings};
use crate::obs;

/// A module admitted into the registry at initialization.
#[derive(Clone)]
pub struct ModuleRegistration {
    pub name: String,
    pub category: Category,
    pub version: String,
    pub module: Arc<dyn AnalysisModule>,
}

impl std::fmt::Debug for ModuleRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistration")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Introspection view of one registered module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub category: Category,
    pub version: String,
    pub supports_auto_fix: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    Ok,
    Failed { error: String },
    TimedOut,
}

/// What happened to one module during one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRun {
    pub module: String,
    pub findings: usize,
    pub elapsed_ms: u64,
    pub outcome: ModuleOutcome,
}

impl ModuleRun {
    pub fn succeeded(&self) -> bool {
        self.outcome == ModuleOutcome::Ok
    }
}

/// Merged findings plus one run record per executed module, in execution
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub results: Vec<AnalysisResult>,
    pub module_runs: Vec<ModuleRun>,
}

impl AnalysisReport {
    pub fn coverage(&self) -> AnalysisCoverage {
        AnalysisCoverage {
            modules_run: self.module_runs.len(),
            modules_failed: self.module_runs.iter().filter(|r| !r.succeeded()).count(),
        }
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.module_runs
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.module.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub initialized: bool,
    pub total_modules: usize,
    pub modules_by_category: BTreeMap<Category, usize>,
    pub auto_fix_capable: usize,
    pub parallel: bool,
    pub max_concurrent_analyses: usize,
    pub timeout_ms: u64,
    /// Counters since construction, not reset by `reset()`.
    pub passes: u64,
    pub module_failures: u64,
    pub module_timeouts: u64,
    pub findings_produced: u64,
}

#[derive(Default)]
struct Counters {
    passes: AtomicU64,
    module_failures: AtomicU64,
    module_timeouts: AtomicU64,
    findings_produced: AtomicU64,
}

pub struct AnalysisEngine {
    config: AnalysisConfig,
    settings: BTreeMap<String, ModuleSettings>,
    events: EventBus,
    /// `None` until `initialize`; registration order is execution order.
    registry: RwLock<Option<Vec<ModuleRegistration>>>,
    counters: Counters,
}

impl AnalysisEngine {
    pub fn new(
        config: AnalysisConfig,
        settings: BTreeMap<String, ModuleSettings>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            settings,
            events,
            registry: RwLock::new(None),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &PrflowConfig, events: EventBus) -> Self {
        Self::new(config.analysis.clone(), config.modules.clone(), events)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Build the registry from the modules available to this process,
    /// keeping those whose category is enabled and whose name passes the
    /// category's module subset.
    ///
    /// An empty registry is not an error; `is_healthy()` reports it.
    pub fn initialize(&self, available: Vec<Arc<dyn AnalysisModule>>) -> Result<(), EngineError> {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }

        let mut seen = HashSet::new();
        let mut admitted = Vec::new();
        for module in available {
            let name = module.name().to_string();
            let category = module.category();
            if !self.config.categories.get(category).admits(&name) {
                debug!(module = %name, category = %category, "module not enabled");
                continue;
            }
            if !seen.insert(name.clone()) {
                warn!(module = %name, "duplicate module name ignored");
                continue;
            }
            admitted.push(ModuleRegistration {
                name,
                category,
                version: module.version().to_string(),
                module,
            });
        }

        for category in Category::ALL {
            let cfg = self.config.categories.get(category);
            if !cfg.enabled {
                continue;
            }
            for wanted in cfg.modules.iter().flatten() {
                if !seen.contains(wanted) {
                    warn!(module = %wanted, category = %category, "configured module not found");
                }
            }
        }

        if admitted.is_empty() {
            warn!("analysis engine initialized with no modules");
        } else {
            info!(modules = admitted.len(), "analysis engine initialized");
        }
        *registry = Some(admitted);
        Ok(())
    }

    /// Drop the registry so `initialize` may run again.
    pub fn reset(&self) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_healthy(&self) -> bool {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|mods| !mods.is_empty())
    }

    fn snapshot(&self) -> Result<Vec<ModuleRegistration>, EngineError> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EngineError::NotInitialized)
    }

    fn lookup(&self, name: &str) -> Result<ModuleRegistration, EngineError> {
        self.snapshot()?
            .into_iter()
            .find(|r| r.name == name)
            .ok_or_else(|| EngineError::UnknownModule(name.to_string()))
    }

    /// Run every registered module and return the merged findings.
    pub async fn analyze_all(&self, pr: &PrContext) -> Result<Vec<AnalysisResult>, EngineError> {
        Ok(self.analyze_all_detailed(pr).await?.results)
    }

    pub async fn analyze_all_detailed(&self, pr: &PrContext) -> Result<AnalysisReport, EngineError> {
        let modules = self.snapshot()?;
        Ok(self.execute(pr, &modules).await)
    }

    /// Run only the named modules, in the order given. Unknown names are
    /// skipped with a warning.
    pub async fn analyze_with_modules<S: AsRef<str>>(
        &self,
        pr: &PrContext,
        names: &[S],
    ) -> Result<AnalysisReport, EngineError> {
        let registry = self.snapshot()?;
        let mut selected = Vec::new();
        for name in names {
            let name = name.as_ref();
            match registry.iter().find(|r| r.name == name) {
                Some(reg) if !selected.iter().any(|s: &ModuleRegistration| s.name == name) => {
                    selected.push(reg.clone())
                }
                Some(_) => {}
                None => warn!(module = %name, "requested module is not registered; skipping"),
            }
        }
        Ok(self.execute(pr, &selected).await)
    }

    async fn execute(&self, pr: &PrContext, modules: &[ModuleRegistration]) -> AnalysisReport {
        self.counters.passes.fetch_add(1, Ordering::Relaxed);
        let mut report = AnalysisReport::default();

        if self.config.parallel {
            let batch_size = self.config.max_concurrent_analyses.max(1);
            for batch in modules.chunks(batch_size) {
                let outputs = join_all(batch.iter().map(|reg| self.run_module(reg, pr))).await;
                for (findings, run) in outputs {
                    report.results.extend(findings);
                    report.module_runs.push(run);
                }
            }
        } else {
            for reg in modules {
                let (findings, run) = self.run_module(reg, pr).await;
                report.results.extend(findings);
                report.module_runs.push(run);
            }
        }

        debug!(
            modules = report.module_runs.len(),
            findings = report.results.len(),
            "analysis pass finished"
        );
        report
    }

    async fn run_module(
        &self,
        reg: &ModuleRegistration,
        pr: &PrContext,
    ) -> (Vec<AnalysisResult>, ModuleRun) {
        let name = reg.name.clone();
        self.events.publish(Notification::ModuleStarted {
            module: name.clone(),
        });

        let empty = ModuleSettings::default();
        let settings = self.settings.get(&name).unwrap_or(&empty);
        let started = Instant::now();
        let invocation = AssertUnwindSafe(reg.module.analyze(pr, settings)).catch_unwind();
        let outcome = match tokio::time::timeout(self.config.timeout(), invocation).await {
            Ok(Ok(Ok(findings))) => Ok(findings),
            Ok(Ok(Err(e))) => Err(EngineError::ModuleFailed {
                module: name.clone(),
                message: e.to_string(),
            }),
            Ok(Err(_)) => Err(EngineError::ModulePanicked {
                module: name.clone(),
            }),
            Err(_) => Err(EngineError::ModuleTimedOut {
                module: name.clone(),
                timeout_ms: self.config.timeout_ms,
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(findings) => {
                let produced = findings.len();
                let findings: Vec<AnalysisResult> =
                    findings.into_iter().filter(|f| f.module == name).collect();
                if findings.len() != produced {
                    warn!(
                        module = %name,
                        dropped = produced - findings.len(),
                        "dropping findings attributed to another module"
                    );
                }
                self.counters
                    .findings_produced
                    .fetch_add(findings.len() as u64, Ordering::Relaxed);
                debug!(module = %name, findings = findings.len(), elapsed_ms, "module finished");
                self.events.publish(Notification::ModuleCompleted {
                    module: name.clone(),
                    findings: findings.len(),
                    elapsed_ms,
                });
                let run = ModuleRun {
                    module: name,
                    findings: findings.len(),
                    elapsed_ms,
                    outcome: ModuleOutcome::Ok,
                };
                (findings, run)
            }
            Err(err) => {
                let timed_out = matches!(err, EngineError::ModuleTimedOut { .. });
                self.counters.module_failures.fetch_add(1, Ordering::Relaxed);
                METRICS.inc_module_failures();
                if timed_out {
                    self.counters.module_timeouts.fetch_add(1, Ordering::Relaxed);
                    METRICS.inc_module_timeouts();
                }
                obs::emit_module_failed(&name, &err, elapsed_ms);
                self.events.publish(Notification::ModuleFailed {
                    module: name.clone(),
                    error: err.to_string(),
                    elapsed_ms,
                });
                let outcome = if timed_out {
                    ModuleOutcome::TimedOut
                } else {
                    ModuleOutcome::Failed {
                        error: err.to_string(),
                    }
                };
                let run = ModuleRun {
                    module: name,
                    findings: 0,
                    elapsed_ms,
                    outcome,
                };
                (Vec::new(), run)
            }
        }
    }

    /// Whether the module that produced `result` could remediate it.
    /// Unknown modules and an uninitialized engine answer `false`.
    pub fn can_auto_fix(&self, result: &AnalysisResult) -> bool {
        self.lookup(&result.module)
            .map(|reg| reg.module.supports_auto_fix() && reg.module.can_auto_fix(result))
            .unwrap_or(false)
    }

    /// Delegate an auto-fix to the owning module under the same deadline
    /// as analysis.
    pub async fn request_auto_fix(
        &self,
        result: &AnalysisResult,
        pr: &PrContext,
    ) -> Result<AutoFixResult, EngineError> {
        let reg = self.lookup(&result.module)?;
        if !reg.module.supports_auto_fix() {
            return Err(EngineError::AutoFixUnsupported { module: reg.name });
        }

        let invocation = AssertUnwindSafe(reg.module.auto_fix(result, pr)).catch_unwind();
        match tokio::time::timeout(self.config.timeout(), invocation).await {
            Ok(Ok(Ok(fix))) => Ok(fix),
            Ok(Ok(Err(ModuleError::Unsupported))) => {
                Err(EngineError::AutoFixUnsupported { module: reg.name })
            }
            Ok(Ok(Err(e))) => Err(EngineError::ModuleFailed {
                module: reg.name,
                message: e.to_string(),
            }),
            Ok(Err(_)) => Err(EngineError::ModulePanicked { module: reg.name }),
            Err(_) => Err(EngineError::ModuleTimedOut {
                module: reg.name,
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    /// Registered modules in registration order; empty before `initialize`.
    pub fn module_info(&self) -> Vec<ModuleInfo> {
        self.snapshot()
            .unwrap_or_default()
            .iter()
            .map(|r| ModuleInfo {
                name: r.name.clone(),
                category: r.category,
                version: r.version.clone(),
                supports_auto_fix: r.module.supports_auto_fix(),
            })
            .collect()
    }

    /// Registered module names per category.
    pub fn modules_by_category(&self) -> BTreeMap<Category, Vec<String>> {
        let mut grouped: BTreeMap<Category, Vec<String>> = BTreeMap::new();
        for reg in self.snapshot().unwrap_or_default() {
            grouped.entry(reg.category).or_default().push(reg.name);
        }
        grouped
    }

    pub fn statistics(&self) -> EngineStatistics {
        let info = self.module_info();
        let mut modules_by_category = BTreeMap::new();
        for m in &info {
            *modules_by_category.entry(m.category).or_insert(0) += 1;
        }
        EngineStatistics {
            initialized: self.is_initialized(),
            total_modules: info.len(),
            modules_by_category,
            auto_fix_capable: info.iter().filter(|m| m.supports_auto_fix).count(),
            parallel: self.config.parallel,
            max_concurrent_analyses: self.config.max_concurrent_analyses,
            timeout_ms: self.config.timeout_ms,
            passes: self.counters.passes.load(Ordering::Relaxed),
            module_failures: self.counters.module_failures.load(Ordering::Relaxed),
            module_timeouts: self.counters.module_timeouts.load(Ordering::Relaxed),
            findings_produced: self.counters.findings_produced.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryConfig;
    use crate::fakes::{sample_pr, ScriptedModule};
    use crate::Severity;

    fn engine(config: AnalysisConfig) -> AnalysisEngine {
        AnalysisEngine::new(config, BTreeMap::new(), EventBus::new())
    }

    fn finding(module: &str, title: &str) -> AnalysisResult {
        AnalysisResult::new(module, Category::Static, Severity::Low, title, "d")
    }

    #[test]
    fn double_initialize_is_rejected_until_reset() {
        let engine = engine(AnalysisConfig::default());
        engine
            .initialize(vec![Arc::new(ScriptedModule::new("a", Category::Static))])
            .unwrap();
        assert!(matches!(
            engine.initialize(Vec::new()),
            Err(EngineError::AlreadyInitialized)
        ));

        engine.reset();
        assert!(!engine.is_initialized());
        engine.initialize(Vec::new()).unwrap();
    }

    #[test]
    fn empty_registry_is_unhealthy_not_an_error() {
        let engine = engine(AnalysisConfig::default());
        assert!(!engine.is_healthy());
        engine.initialize(Vec::new()).unwrap();
        assert!(engine.is_initialized());
        assert!(!engine.is_healthy());
    }

    #[test]
    fn disabled_categories_and_subsets_filter_registration() {
        let mut config = AnalysisConfig::default();
        config.categories.security.enabled = false;
        config.categories.static_analysis = CategoryConfig {
            enabled: true,
            modules: Some(vec!["keep".to_string(), "missing".to_string()]),
        };
        let engine = engine(config);
        engine
            .initialize(vec![
                Arc::new(ScriptedModule::new("keep", Category::Static)),
                Arc::new(ScriptedModule::new("drop", Category::Static)),
                Arc::new(ScriptedModule::new("secrets", Category::Security)),
                Arc::new(ScriptedModule::new("size", Category::Compliance)),
            ])
            .unwrap();

        let names: Vec<String> = engine.module_info().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["keep", "size"]);
        let stats = engine.statistics();
        assert_eq!(stats.total_modules, 2);
        assert_eq!(stats.modules_by_category.get(&Category::Security), None);
    }

    #[tokio::test]
    async fn analyze_before_initialize_fails() {
        let engine = engine(AnalysisConfig::default());
        let err = engine.analyze_all(&sample_pr()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotInitialized));
    }

    #[tokio::test]
    async fn analyze_with_modules_skips_unknown_names() {
        let engine = engine(AnalysisConfig::default());
        engine
            .initialize(vec![
                Arc::new(
                    ScriptedModule::new("a", Category::Static)
                        .with_findings(vec![finding("a", "one")]),
                ),
                Arc::new(
                    ScriptedModule::new("b", Category::Static)
                        .with_findings(vec![finding("b", "two"), finding("b", "three")]),
                ),
            ])
            .unwrap();

        let report = engine
            .analyze_with_modules(&sample_pr(), &["b", "nope"])
            .await
            .unwrap();
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.module_runs.len(), 1);
        assert_eq!(report.module_runs[0].module, "b");
    }

    #[tokio::test]
    async fn findings_from_other_modules_are_dropped() {
        let engine = engine(AnalysisConfig::default());
        engine
            .initialize(vec![Arc::new(
                ScriptedModule::new("honest", Category::Static)
                    .with_findings(vec![finding("honest", "ok"), finding("impostor", "bad")]),
            )])
            .unwrap();

        let results = engine.analyze_all(&sample_pr()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].module, "honest");
    }

    #[tokio::test]
    async fn failing_module_is_isolated_and_counted() {
        let engine = engine(AnalysisConfig::default());
        engine
            .initialize(vec![
                Arc::new(ScriptedModule::new("bad", Category::Static).failing("disk on fire")),
                Arc::new(
                    ScriptedModule::new("good", Category::Static)
                        .with_findings(vec![finding("good", "x")]),
                ),
            ])
            .unwrap();

        let report = engine.analyze_all_detailed(&sample_pr()).await.unwrap();
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.failed_modules(), vec!["bad"]);
        assert_eq!(report.coverage().percent(), 50.0);
        assert_eq!(engine.statistics().module_failures, 1);
    }

    #[tokio::test]
    async fn auto_fix_requires_support() {
        let engine = engine(AnalysisConfig::default());
        engine
            .initialize(vec![Arc::new(ScriptedModule::new("plain", Category::Static))])
            .unwrap();
        let result = finding("plain", "x").auto_fixable(true);

        assert!(!engine.can_auto_fix(&result));
        let err = engine
            .request_auto_fix(&result, &sample_pr())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AutoFixUnsupported { .. }));

        let orphan = finding("ghost", "x");
        let err = engine
            .request_auto_fix(&orphan, &sample_pr())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownModule(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn auto_fix_delegates_to_owning_module() {
        let engine = engine(AnalysisConfig::default());
        let module = Arc::new(ScriptedModule::new("fixer", Category::Static).with_auto_fix());
        engine.initialize(vec![module.clone()]).unwrap();
        let result = finding("fixer", "x").auto_fixable(true);

        assert!(engine.can_auto_fix(&result));
        let fix = engine.request_auto_fix(&result, &sample_pr()).await.unwrap();
        assert!(fix.success);
        assert_eq!(module.fixes_applied(), 1);
    }
}
