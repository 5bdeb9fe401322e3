//! Prometheus metrics for the larder server.
//!
//! Covers uploads, proposal transitions and the certified read path.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated to allow Prometheus scraping.
//! Metrics carry no paths or caller names, only aggregate counts.
//! Restrict the endpoint to scraper IPs at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload metrics
pub static BATCHES_OPENED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_upload_batches_opened_total",
        "Total number of upload batches opened",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMMITTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_uploads_committed_total",
            "Total committed upload batches by destination (live or staged)",
        ),
        &["destination"],
    )
    .expect("metric creation failed")
});

pub static CHUNKS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_chunks_uploaded_total",
        "Total number of chunks uploaded",
    )
    .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("larder_bytes_uploaded_total", "Total chunk bytes uploaded")
        .expect("metric creation failed")
});

pub static UPLOAD_COMMIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "larder_upload_commit_duration_seconds",
            "Time taken to commit an upload batch",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
    )
    .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "larder_chunk_upload_duration_seconds",
            "Time taken to receive and store a single chunk",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_upload_errors_total",
            "Total upload errors by error code",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Proposal metrics
pub static PROPOSAL_TRANSITIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_proposal_transitions_total",
            "Proposal state transitions by resulting status",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

// Read path metrics
pub static HTTP_RESPONSES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_http_responses_total",
            "Certified read path responses by status code",
        ),
        &["status"],
    )
    .expect("metric creation failed")
});

pub static STREAMED_SLICES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_streamed_slices_total",
        "Total body slices served through streaming callbacks",
    )
    .expect("metric creation failed")
});

// State gauges
pub static ASSETS_STORED: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("larder_assets_stored", "Current number of live assets")
        .expect("metric creation failed")
});

pub static OPEN_BATCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new("larder_open_batches", "Current number of open upload batches")
        .expect("metric creation failed")
});

// Housekeeping metrics
pub static STALE_BATCHES_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_stale_batches_purged_total",
        "Total upload batches dropped after their TTL",
    )
    .expect("metric creation failed")
});

pub static SNAPSHOTS_SAVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("larder_snapshots_saved_total", "Total snapshots written")
        .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build several routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(BATCHES_OPENED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_COMMIT_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNK_UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_ERRORS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(PROPOSAL_TRANSITIONS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(HTTP_RESPONSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(STREAMED_SLICES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(ASSETS_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OPEN_BATCHES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(STALE_BATCHES_PURGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SNAPSHOTS_SAVED.clone()))
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

pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

pub fn record_transition(status: larder_core::ProposalStatus) {
    PROPOSAL_TRANSITIONS
        .with_label_values(&[status.as_str()])
        .inc();
}

/// Refresh the state gauges from a depot.
pub fn observe_depot(depot: &larder_store::Depot) {
    ASSETS_STORED.set(depot.assets().len() as i64);
    OPEN_BATCHES.set(depot.uploads().batch_count() as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_transition_labels() {
        let before = PROPOSAL_TRANSITIONS
            .with_label_values(&["executed"])
            .get();
        record_transition(larder_core::ProposalStatus::Executed);
        assert_eq!(
            PROPOSAL_TRANSITIONS.with_label_values(&["executed"]).get(),
            before + 1
        );
    }
}
