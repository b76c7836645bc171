//! Prometheus metrics for the Splice server.
//!
//! Exposes counters for fragment intake, assembly outcomes, and the staging
//! sweep.
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no file names, only aggregate counts. Restrict the endpoint
//! to the scraper at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Fragment intake
pub static FRAGMENTS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_fragments_received_total",
        "Total number of fragments written to staging",
    )
    .expect("metric creation failed")
});

pub static FRAGMENT_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_fragment_bytes_received_total",
        "Total fragment payload bytes written to staging",
    )
    .expect("metric creation failed")
});

// Assembly
pub static ASSEMBLIES_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_assemblies_completed_total",
        "Total number of uploads assembled and published",
    )
    .expect("metric creation failed")
});

pub static ASSEMBLY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "splice_assembly_failures_total",
            "Total failed fragment submissions by stage",
        ),
        &["stage"],
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_bytes_uploaded_total",
        "Total bytes of assembled files published to the object store",
    )
    .expect("metric creation failed")
});

pub static ASSEMBLY_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "splice_assembly_duration_seconds",
            "Time from final fragment receipt to published object",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

pub static ACTIVE_ASSEMBLIES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "splice_active_assemblies",
        "Number of assemblies currently in progress",
    )
    .expect("metric creation failed")
});

// Sweep
pub static SWEEP_ITEMS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_sweep_items_deleted_total",
        "Total stale staging entries deleted by the sweep",
    )
    .expect("metric creation failed")
});

pub static SWEEP_BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_sweep_bytes_reclaimed_total",
        "Total staging bytes reclaimed by the sweep",
    )
    .expect("metric creation failed")
});

pub static SWEEP_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_sweep_errors_total",
        "Total per-entry failures encountered by the sweep",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(FRAGMENTS_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(FRAGMENT_BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSEMBLIES_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSEMBLY_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSEMBLY_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ACTIVE_ASSEMBLIES.clone()))
            .expect("metric registration failed");

        // Sweep metrics
        REGISTRY
            .register(Box::new(SWEEP_ITEMS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_BYTES_RECLAIMED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed submission at the given stage.
pub fn record_assembly_failure(stage: &str) {
    ASSEMBLY_FAILURES.with_label_values(&[stage]).inc();
}
