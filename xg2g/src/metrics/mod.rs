//! In-process labelled counters. Only the metric *shape* is part of the
//! contract (§"Explicit non-goals": Prometheus plumbing is external); this
//! module keeps the counts in memory so tests and the debug endpoint can
//! observe them without an external exporter.

use dashmap::DashMap;

#[derive(Debug, Clone, Default)]
struct Histogram {
    count: u64,
    sum: f64,
}

/// A `(metric name, label tuple) → value` table. Counters and observations
/// share one map; lock-free reads/writes per §5's "metrics counters are
/// lock-free".
#[derive(Default)]
pub struct Counters {
    counts: DashMap<(String, Vec<String>), u64>,
    histograms: DashMap<(String, Vec<String>), Histogram>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str, labels: &[&str]) {
        let key = (name.to_string(), labels.iter().map(|s| s.to_string()).collect());
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn observe(&self, name: &str, labels: &[&str], value: f64) {
        let key = (name.to_string(), labels.iter().map(|s| s.to_string()).collect());
        let mut entry = self.histograms.entry(key).or_default();
        entry.count += 1;
        entry.sum += value;
    }

    pub fn count(&self, name: &str, labels: &[&str]) -> u64 {
        let key = (name.to_string(), labels.iter().map(|s| s.to_string()).collect());
        self.counts.get(&key).map(|v| *v).unwrap_or(0)
    }

    pub fn histogram_count(&self, name: &str, labels: &[&str]) -> u64 {
        let key = (name.to_string(), labels.iter().map(|s| s.to_string()).collect());
        self.histograms.get(&key).map(|h| h.count).unwrap_or(0)
    }
}

/// Increments `errors_total{area, code}`. Called from the error-mapping path
/// in [`crate::errors::AppError::into_problem`]'s caller so every response
/// with a stable `code` is counted, per §7's observability requirement.
pub fn record_error(counters: &Counters, area: &str, code: &str) {
    counters.increment("errors_total", &[area, code]);
}
