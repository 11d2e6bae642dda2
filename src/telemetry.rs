//! # Telemetry Sink
//!
//! Components that emit metrics (the remote cache store, the traffic-switching provider,
//! the quote service) take an explicit [`TelemetrySink`] instead of calling global
//! recorder functions, so their side effects are part of their constructor and can be
//! asserted on in tests with [`RecordingSink`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::metrics;

pub type Labels<'a> = &'a [(&'static str, &'a str)];

pub trait TelemetrySink: Send + Sync {
    /// Adds `value` to the counter `name`.
    fn count(&self, name: &'static str, value: u64, labels: Labels<'_>);

    /// Records an operation latency.
    fn latency(&self, name: &'static str, elapsed: Duration, labels: Labels<'_>);
}

/// Forwards to the process-wide `metrics` recorder (no-op without `observability`).
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl TelemetrySink for MetricsSink {
    fn count(&self, name: &'static str, value: u64, labels: Labels<'_>) {
        metrics::increment_counter_labeled(name, value, labels);
    }

    fn latency(&self, name: &'static str, elapsed: Duration, labels: Labels<'_>) {
        metrics::record_histogram_labeled(name, elapsed.as_secs_f64() * 1000.0, labels);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn count(&self, _name: &'static str, _value: u64, _labels: Labels<'_>) {}

    fn latency(&self, _name: &'static str, _elapsed: Duration, _labels: Labels<'_>) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedKind {
    Count(u64),
    Latency(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedMetric {
    pub name: &'static str,
    pub kind: RecordedKind,
    pub labels: Vec<(&'static str, String)>,
}

impl RecordedMetric {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// In-memory sink that keeps every emitted event.
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RecordedMetric>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedMetric> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Sum of all counter increments for `name` whose labels include every pair in `labels`.
    pub fn counter_total(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.events()
            .iter()
            .filter(|event| event.name == name)
            .filter(|event| labels.iter().all(|(k, v)| event.label(k) == Some(*v)))
            .map(|event| match event.kind {
                RecordedKind::Count(value) => value,
                RecordedKind::Latency(_) => 0,
            })
            .sum()
    }

    fn push(&self, metric: RecordedMetric) {
        if let Ok(mut events) = self.events.lock() {
            events.push(metric);
        }
    }
}

impl TelemetrySink for RecordingSink {
    fn count(&self, name: &'static str, value: u64, labels: Labels<'_>) {
        self.push(RecordedMetric {
            name,
            kind: RecordedKind::Count(value),
            labels: labels.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        });
    }

    fn latency(&self, name: &'static str, elapsed: Duration, labels: Labels<'_>) {
        self.push(RecordedMetric {
            name,
            kind: RecordedKind::Latency(elapsed),
            labels: labels.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        });
    }
}
