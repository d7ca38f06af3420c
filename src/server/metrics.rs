use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "phrase_audio";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Pipeline Metrics
    pub static ref PIPELINE_OPERATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_pipeline_operations_total"),
            "Ingest/retrieve/remove calls by outcome code"
        ),
        &["operation", "code"]
    ).expect("Failed to create pipeline_operations_total metric");

    pub static ref PIPELINE_OPERATION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_pipeline_operation_duration_seconds"),
            "Pipeline call duration in seconds"
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["operation"]
    ).expect("Failed to create pipeline_operation_duration_seconds metric");

    // Transcoding Metrics
    pub static ref TRANSCODE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_transcode_duration_seconds"),
            "Encoder subprocess duration in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["direction", "outcome"]
    ).expect("Failed to create transcode_duration_seconds metric");

    pub static ref TRANSCODES_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_transcodes_active"),
        "ffmpeg subprocesses currently running, probes included"
    ).expect("Failed to create transcodes_active metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_OPERATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PIPELINE_OPERATION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TRANSCODES_ACTIVE.clone()));
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the outcome of a pipeline call. `code` is the wire code, SUCCESS included.
pub fn record_pipeline_operation(operation: &str, code: &str, duration: Duration) {
    PIPELINE_OPERATIONS_TOTAL
        .with_label_values(&[operation, code])
        .inc();

    PIPELINE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_transcode(direction: &str, outcome: &str, duration: Duration) {
    TRANSCODE_DURATION_SECONDS
        .with_label_values(&[direction, outcome])
        .observe(duration.as_secs_f64());
}

/// Counts a running ffmpeg process in [`TRANSCODES_ACTIVE`] for as long as it lives.
pub struct ActiveTranscodeGuard(());

impl ActiveTranscodeGuard {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        TRANSCODES_ACTIVE.inc();
        Self(())
    }
}

impl Drop for ActiveTranscodeGuard {
    fn drop(&mut self) {
        TRANSCODES_ACTIVE.dec();
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
