/// Prometheus metrics for Estate Gate
///
/// Exposed on `GET /metrics`:
/// - HTTP request counts and latencies
/// - Visitor token, entry and exit counts
/// - Payment settlements
/// - Background job executions
use crate::error::{EstateError, EstateResult};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, route, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "estate_http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "estate_http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    pub static ref HTTP_REQUESTS_ACTIVE: IntGauge = register_int_gauge!(
        "estate_http_requests_active",
        "Number of HTTP requests currently being processed"
    )
    .unwrap();

    // ========== Gate Metrics ==========

    /// Visitor tokens issued by stay type
    pub static ref TOKENS_ISSUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "estate_visitor_tokens_issued_total",
        "Total number of visitor tokens issued",
        &["stay_type"]
    )
    .unwrap();

    pub static ref ENTRIES_GRANTED_TOTAL: IntCounter = register_int_counter!(
        "estate_visitor_entries_granted_total",
        "Total number of visitor entries granted at the gate"
    )
    .unwrap();

    pub static ref EXITS_RECORDED_TOTAL: IntCounter = register_int_counter!(
        "estate_visitor_exits_recorded_total",
        "Total number of visitor exits recorded at the gate"
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Registration OTPs sent
    pub static ref OTPS_ISSUED_TOTAL: IntCounter = register_int_counter!(
        "estate_registration_otps_issued_total",
        "Total number of registration OTPs issued"
    )
    .unwrap();

    /// Registrations by role
    pub static ref ACCOUNT_CREATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "estate_account_creations_total",
        "Total number of accounts created",
        &["role"]
    )
    .unwrap();

    // ========== Payment Metrics ==========

    pub static ref PAYMENTS_SETTLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "estate_payments_settled_total",
        "Total number of payments settled",
        &["package_type", "period"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "estate_background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "estate_background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========== System Metrics ==========

    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "estate_uptime_seconds",
        "Application uptime in seconds"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> EstateResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| EstateError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| EstateError::Internal(format!("Metrics are not UTF-8: {}", e)))
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, success: bool, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, if success { "success" } else { "failure" }])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}
