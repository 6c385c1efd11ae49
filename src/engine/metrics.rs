// Evaluation counters for the rule engine
//
// Injected into the engine service; nothing here exports anywhere, the
// counters are for logs and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters over rule-engine activity.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    calculations: AtomicU64,
    rule_errors: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_calculation(&self) {
        self.inner.calculations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rule_error(&self) {
        self.inner.rule_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calculations(&self) -> u64 {
        self.inner.calculations.load(Ordering::Relaxed)
    }

    pub fn rule_errors(&self) -> u64 {
        self.inner.rule_errors.load(Ordering::Relaxed)
    }
}
