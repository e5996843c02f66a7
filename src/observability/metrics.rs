use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec, TextEncoder,
};

// Metrics registry
static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "status"]
    )
    .unwrap()
});

static RATE_LIMIT_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_decisions_total",
        "Total number of admission decisions",
        &["reason"]
    )
    .unwrap()
});

static RATE_LIMIT_STORE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_store_errors_total",
        "Total number of counter store failures",
        &["kind"]
    )
    .unwrap()
});

static AUDIT_RECORDS_WRITTEN_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "audit_records_written_total",
        "Total number of audit records flushed to storage"
    )
    .unwrap()
});

static AUDIT_RECORDS_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "audit_records_dropped_total",
        "Total number of audit records dropped before storage"
    )
    .unwrap()
});

static AUDIT_BATCH_WRITE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "audit_batch_write_duration_seconds",
        "Audit batch write latency in seconds",
        vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_http_request(method: &str, status: u16) {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    pub fn record_decision(reason: &str) {
        RATE_LIMIT_DECISIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_store_error(kind: &str) {
        RATE_LIMIT_STORE_ERRORS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn record_audit_written(count: usize, duration: f64) {
        AUDIT_RECORDS_WRITTEN_TOTAL.inc_by(count as u64);
        AUDIT_BATCH_WRITE_DURATION.observe(duration);
    }

    pub fn record_audit_dropped(count: usize) {
        AUDIT_RECORDS_DROPPED_TOTAL.inc_by(count as u64);
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
