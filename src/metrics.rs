// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_histogram, histogram, Label, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {
    Count,
    Milliseconds,
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

use once_cell::sync::OnceCell;

pub const ROUTE_CACHE_GET: &str = "route_cache_get_total";
pub const ROUTE_CACHE_SET: &str = "route_cache_set_total";
pub const ROUTE_CACHE_STALE: &str = "route_cache_stale_total";
pub const ROUTE_CACHE_BATCH_UNPROCESSED_KEYS: &str = "route_cache_batch_unprocessed_keys_total";
pub const ROUTE_CACHE_LATENCY_MS: &str = "route_cache_latency_ms";
pub const TRAFFIC_SWITCH_SELECTED: &str = "traffic_switch_selected_total";
pub const TRAFFIC_SWITCH_SAMPLE: &str = "traffic_switch_sample_total";
pub const TRAFFIC_SWITCH_LATENCY_MS: &str = "traffic_switch_latency_ms";
pub const QUOTE_SOURCE: &str = "quote_source_total";

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Initializes the descriptions for all the metrics in the application.
/// Safe to call more than once; only the first call registers.
pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            ROUTE_CACHE_GET,
            Unit::Count,
            "Remote route cache reads, labeled by cache and result (hit, miss, error)."
        );
        describe_counter!(
            ROUTE_CACHE_SET,
            Unit::Count,
            "Remote route cache writes, labeled by cache and result (ok, rejected, error)."
        );
        describe_counter!(
            ROUTE_CACHE_STALE,
            Unit::Count,
            "Cached routes discarded because the chain head moved past blockNumber + blocksToLive."
        );
        describe_counter!(
            ROUTE_CACHE_BATCH_UNPROCESSED_KEYS,
            Unit::Count,
            "Keys the store left unprocessed in a batch read (throttling indicator)."
        );
        describe_histogram!(
            ROUTE_CACHE_LATENCY_MS,
            Unit::Milliseconds,
            "Remote route cache operation latency in milliseconds, labeled by operation."
        );
        describe_counter!(
            TRAFFIC_SWITCH_SELECTED,
            Unit::Count,
            "Pool lookups served per backing provider (current, target)."
        );
        describe_counter!(
            TRAFFIC_SWITCH_SAMPLE,
            Unit::Count,
            "Shadow comparisons against the source of truth, labeled by result \
             (match, mismatch, error, timeout)."
        );
        describe_histogram!(
            TRAFFIC_SWITCH_LATENCY_MS,
            Unit::Milliseconds,
            "Pool provider latency in milliseconds, labeled by provider role."
        );
        describe_counter!(
            QUOTE_SOURCE,
            Unit::Count,
            "Quotes served, labeled by source (cache, live) and cache mode."
        );
    });
}

/// Generic counter with dynamic labels, used by [`crate::telemetry::MetricsSink`].
pub fn increment_counter_labeled(name: &'static str, value: u64, labels: &[(&'static str, &str)]) {
    #[cfg(feature = "observability")]
    {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(key, value)| Label::new(*key, value.to_string()))
            .collect();
        counter!(name, value, labels);
    }
    #[cfg(not(feature = "observability"))]
    {
        let _ = (name, value, labels);
    }
}

/// Generic histogram with dynamic labels, used by [`crate::telemetry::MetricsSink`].
pub fn record_histogram_labeled(name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
    #[cfg(feature = "observability")]
    {
        let labels: Vec<Label> = labels
            .iter()
            .map(|(key, value)| Label::new(*key, value.to_string()))
            .collect();
        histogram!(name, value, labels);
    }
    #[cfg(not(feature = "observability"))]
    {
        let _ = (name, value, labels);
    }
}
