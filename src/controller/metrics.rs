//! Prometheus metrics for the FlowForge Kubernetes driver
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports the following metrics:
//! - `flowforge_upserts_total` (counter): upserts labeled by resource kind and outcome.
//! - `flowforge_poll_timeouts_total` (counter): readiness polls that ran out of attempts, by kind.
//! - `flowforge_teardown_failures_total` (counter): failed teardown steps, by step.
//! - `flowforge_sweep_recreated_total` (counter): instances recreated by the startup sweep.
//! - `flowforge_lifecycle_duration_seconds` (histogram): start/stop/remove duration by operation.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for upsert outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpsertLabels {
    /// Resource kind, e.g. "Deployment"
    pub kind: String,
    /// "created", "replaced", "unchanged" or "kept"
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StepLabels {
    pub step: String,
}

/// Labels for lifecycle operation metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    /// "start", "stop" or "remove"
    pub operation: String,
}

pub static UPSERTS_TOTAL: Lazy<Family<UpsertLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static POLL_TIMEOUTS_TOTAL: Lazy<Family<KindLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static TEARDOWN_FAILURES_TOTAL: Lazy<Family<StepLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Counter tracking instances the startup sweep found missing and recreated
pub static SWEEP_RECREATED_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

/// Histogram tracking lifecycle operation duration (seconds)
pub static LIFECYCLE_DURATION_SECONDS: Lazy<Family<OperationLabels, Histogram>> =
    Lazy::new(|| {
        fn lifecycle_histogram() -> Histogram {
            // 10ms .. ~5min across 16 buckets; starts poll for tens of seconds.
            Histogram::new(exponential_buckets(0.01, 2.0, 16))
        }

        Family::new_with_constructor(lifecycle_histogram)
    });

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "flowforge_upserts",
        "Create-or-update calls by resource kind and outcome",
        UPSERTS_TOTAL.clone(),
    );
    registry.register(
        "flowforge_poll_timeouts",
        "Readiness polls that ran out of attempts",
        POLL_TIMEOUTS_TOTAL.clone(),
    );
    registry.register(
        "flowforge_teardown_failures",
        "Teardown steps that failed for a reason other than absence",
        TEARDOWN_FAILURES_TOTAL.clone(),
    );
    registry.register(
        "flowforge_sweep_recreated",
        "Instances recreated by the startup reconciliation sweep",
        SWEEP_RECREATED_TOTAL.clone(),
    );
    registry.register(
        "flowforge_lifecycle_duration_seconds",
        "Duration of start, stop and remove operations in seconds",
        LIFECYCLE_DURATION_SECONDS.clone(),
    );

    registry
});

pub fn inc_upsert(kind: &str, outcome: &str) {
    let labels = UpsertLabels {
        kind: kind.to_string(),
        outcome: outcome.to_string(),
    };
    UPSERTS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_poll_timeout(kind: &str) {
    let labels = KindLabels {
        kind: kind.to_string(),
    };
    POLL_TIMEOUTS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_teardown_failure(step: &str) {
    let labels = StepLabels {
        step: step.to_string(),
    };
    TEARDOWN_FAILURES_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_sweep_recreated() {
    SWEEP_RECREATED_TOTAL.inc();
}

/// Observe a lifecycle operation duration in seconds.
pub fn observe_lifecycle_duration_seconds(operation: &str, seconds: f64) {
    let labels = OperationLabels {
        operation: operation.to_string(),
    };
    LIFECYCLE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}
