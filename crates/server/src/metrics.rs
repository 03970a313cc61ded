//! Prometheus metrics for the formstash server.
//!
//! Counts decode sessions, materialized uploads and persisted bytes, plus
//! failures by error code. The `/metrics` endpoint is unauthenticated and
//! should be network-restricted to the scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use formstash_core::DecodeError;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static DECODE_SESSIONS_STARTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "formstash_decode_sessions_started_total",
        "Total number of multipart decode sessions started",
    )
    .expect("metric creation failed")
});

pub static DECODE_SESSIONS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "formstash_decode_sessions_completed_total",
        "Total number of decode sessions that produced a form",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_MATERIALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "formstash_uploads_materialized_total",
        "Total number of file uploads handed to callers",
    )
    .expect("metric creation failed")
});

pub static BYTES_PERSISTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "formstash_bytes_persisted_total",
        "Total bytes written to temporary upload files",
    )
    .expect("metric creation failed")
});

pub static DECODE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "formstash_decode_failures_total",
            "Total decode failures by error code",
        ),
        &["code"],
    )
    .expect("metric creation failed")
});

pub static DECODE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "formstash_decode_duration_seconds",
            "Time from request start to the decode result",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(DECODE_SESSIONS_STARTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DECODE_SESSIONS_COMPLETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_MATERIALIZED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_PERSISTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DECODE_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DECODE_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Handler for the `/metrics` endpoint.
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

/// Record a failed decode under its error code.
pub fn record_decode_failure(err: &DecodeError) {
    let code = match err {
        DecodeError::Multipart(e) => e.code.as_str(),
        DecodeError::Parse(_) => "MALFORMED",
        DecodeError::Io(_) => "IO",
    };
    DECODE_FAILURES.with_label_values(&[code]).inc();
}
