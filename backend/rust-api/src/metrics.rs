use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Session Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "sessions_total",
        "Assessment session lifecycle transitions",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sessions_active",
        "Number of sessions with a running owner task"
    )
    .unwrap();

    pub static ref ANSWERS_CAPTURED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_captured_total",
        "Total number of answers captured",
        &["question_type"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();

    // Integrity Metrics
    pub static ref INTEGRITY_VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "integrity_violations_total",
        "Total number of integrity violations recorded",
        &["kind"]
    )
    .unwrap();

    // Submission Metrics
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "submissions_total",
        "Total number of submission attempts",
        &["result"]
    )
    .unwrap();

    pub static ref SUBMISSION_DURATION_SECONDS: Histogram = register_histogram!(
        "submission_duration_seconds",
        "Submission sink round-trip in seconds",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}
