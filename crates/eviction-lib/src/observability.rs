//! Observability for the eviction manager
//!
//! Prometheus metrics registered once and shared through a lightweight
//! cloneable handle: evictions by signal, and the age of the stats used
//! for each eviction decision.

use crate::signals::Signal;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::sync::OnceLock;

/// Buckets for stats age (seconds): decisions on minute-old data are
/// already suspect.
const STATS_AGE_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0];

static GLOBAL_METRICS: OnceLock<EvictionMetricsInner> = OnceLock::new();

struct EvictionMetricsInner {
    evictions_total: IntCounterVec,
    eviction_stats_age_seconds: HistogramVec,
}

impl EvictionMetricsInner {
    fn new() -> Self {
        Self {
            evictions_total: register_int_counter_vec!(
                "eviction_agent_evictions_total",
                "Number of pod evictions, by eviction signal",
                &["signal"]
            )
            .expect("Failed to register evictions_total"),

            eviction_stats_age_seconds: register_histogram_vec!(
                "eviction_agent_stats_age_seconds",
                "Age of the stats snapshot backing each met eviction threshold",
                &["signal"],
                STATS_AGE_BUCKETS.to_vec()
            )
            .expect("Failed to register eviction_stats_age_seconds"),
        }
    }
}

/// Handle to the global eviction metrics; clones share the registry.
#[derive(Clone)]
pub struct EvictionMetrics {
    _private: (),
}

impl Default for EvictionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EvictionMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EvictionMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EvictionMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Count one eviction attributed to the given signal.
    pub fn inc_evictions(&self, signal: Signal) {
        self.inner()
            .evictions_total
            .with_label_values(&[signal.as_str()])
            .inc();
    }

    /// Record how old the backing snapshot was for a met threshold.
    pub fn observe_stats_age(&self, signal: Signal, age_seconds: f64) {
        self.inner()
            .eviction_stats_age_seconds
            .with_label_values(&[signal.as_str()])
            .observe(age_seconds.max(0.0));
    }
}
