use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
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

    // Store Metrics (MongoDB, Redis)
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "store_operations_total",
        "Total number of backing store operations",
        &["backend", "operation", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "store_operation_duration_seconds",
        "Backing store operation duration in seconds",
        &["backend", "operation"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Exam Metrics
    pub static ref EXAM_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_sessions_total",
        "Total number of exam sessions by lifecycle status",
        &["status"]
    )
    .unwrap();

    pub static ref EXAM_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "exam_sessions_active",
        "Number of exam sessions currently in progress"
    )
    .unwrap();

    pub static ref EXAM_VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_violations_total",
        "Total number of penalized exam violations",
        &["violation_type"]
    )
    .unwrap();

    pub static ref GRACE_PERIODS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exam_grace_periods_total",
        "Grace periods by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref LIVES_LOST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lives_lost_total",
        "Total number of lives spent",
        &["scope"]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
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

/// Helper: track a MongoDB or Redis operation with metrics
pub async fn track_store_operation<F, T>(
    backend: &str,
    operation: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[backend, operation, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[backend, operation])
        .observe(duration);

    result
}
