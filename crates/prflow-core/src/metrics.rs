//! Global atomic counters for prflow.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the CLI does so at exit).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    workflows_started: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
    module_failures: AtomicU64,
    module_timeouts: AtomicU64,
    auto_fix_attempts: AtomicU64,
    auto_fix_successes: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            workflows_started: AtomicU64::new(0),
            workflows_completed: AtomicU64::new(0),
            workflows_failed: AtomicU64::new(0),
            module_failures: AtomicU64::new(0),
            module_timeouts: AtomicU64::new(0),
            auto_fix_attempts: AtomicU64::new(0),
            auto_fix_successes: AtomicU64::new(0),
        }
    }

    fn bump(counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    pub fn inc_workflows_started(&self) {
        Self::bump(&self.workflows_started, "workflows_started");
    }

    pub fn inc_workflows_completed(&self) {
        Self::bump(&self.workflows_completed, "workflows_completed");
    }

    pub fn inc_workflows_failed(&self) {
        Self::bump(&self.workflows_failed, "workflows_failed");
    }

    /// Counts every isolated module failure, timeouts included.
    pub fn inc_module_failures(&self) {
        Self::bump(&self.module_failures, "module_failures");
    }

    pub fn inc_module_timeouts(&self) {
        Self::bump(&self.module_timeouts, "module_timeouts");
    }

    pub fn inc_auto_fix_attempts(&self) {
        Self::bump(&self.auto_fix_attempts, "auto_fix_attempts");
    }

    pub fn inc_auto_fix_successes(&self) {
        Self::bump(&self.auto_fix_successes, "auto_fix_successes");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            workflows_started = self.workflows_started(),
            workflows_completed = self.workflows_completed(),
            workflows_failed = self.workflows_failed(),
            module_failures = self.module_failures(),
            module_timeouts = self.module_timeouts(),
            auto_fix_attempts = self.auto_fix_attempts(),
            auto_fix_successes = self.auto_fix_successes(),
        );
    }

    pub fn workflows_started(&self) -> u64 {
        self.workflows_started.load(Ordering::Relaxed)
    }

    pub fn workflows_completed(&self) -> u64 {
        self.workflows_completed.load(Ordering::Relaxed)
    }

    pub fn workflows_failed(&self) -> u64 {
        self.workflows_failed.load(Ordering::Relaxed)
    }

    pub fn module_failures(&self) -> u64 {
        self.module_failures.load(Ordering::Relaxed)
    }

    pub fn module_timeouts(&self) -> u64 {
        self.module_timeouts.load(Ordering::Relaxed)
    }

    pub fn auto_fix_attempts(&self) -> u64 {
        self.auto_fix_attempts.load(Ordering::Relaxed)
    }

    pub fn auto_fix_successes(&self) -> u64 {
        self.auto_fix_successes.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.workflows_started,
            &self.workflows_completed,
            &self.workflows_failed,
            &self.module_failures,
            &self.module_timeouts,
            &self.auto_fix_attempts,
            &self.auto_fix_successes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
