//! Metrics module for store-billing.
//! Provides Prometheus metrics for HTTP traffic, billing jobs, gateway charges
//! and the ledger.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "store_billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// HTTP requests by method, route and status
pub static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// HTTP request latency by method, route and status
pub static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Job runs by job and final status
pub static JOB_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Job wall time
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Gateway charge attempts by kind (subscription/commission) and outcome
pub static GATEWAY_CHARGES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Amount successfully collected by kind
pub static CHARGED_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Stores losing access by reason
pub static STORES_BLOCKED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Ledger rows appended by kind and status
pub static LEDGER_ENTRIES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"]
        )
        .expect("Failed to register HTTP_REQUESTS_TOTAL")
    });

    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "http_request_duration_seconds",
                "HTTP request duration in seconds"
            ),
            &["method", "path", "status"]
        )
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS")
    });

    JOB_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("store_billing_job_runs_total", "Billing job runs by job and status"),
            &["job", "status"]
        )
        .expect("Failed to register JOB_RUNS_TOTAL")
    });

    // Buckets sized for batch jobs dominated by sequential gateway calls
    JOB_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "store_billing_job_duration_seconds",
                "Billing job duration",
                vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
            ),
            &["job"]
        )
        .expect("Failed to register JOB_DURATION")
    });

    GATEWAY_CHARGES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "store_billing_gateway_charges_total",
                "Gateway charge attempts by kind and outcome"
            ),
            &["kind", "outcome"]
        )
        .expect("Failed to register GATEWAY_CHARGES_TOTAL")
    });

    CHARGED_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!(
                "store_billing_charged_amount_total",
                "Total amount collected by kind"
            ),
            &["kind"]
        )
        .expect("Failed to register CHARGED_AMOUNT_TOTAL")
    });

    STORES_BLOCKED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "store_billing_stores_blocked_total",
                "Stores whose billing access was revoked, by reason"
            ),
            &["reason"]
        )
        .expect("Failed to register STORES_BLOCKED_TOTAL")
    });

    LEDGER_ENTRIES_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "store_billing_ledger_entries_total",
                "Ledger rows appended by kind and status"
            ),
            &["kind", "status"]
        )
        .expect("Failed to register LEDGER_ENTRIES_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("store_billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "job"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished job run.
pub fn record_job_run(job: &str, status: &str, duration_secs: f64) {
    if let Some(counter) = JOB_RUNS_TOTAL.get() {
        counter.with_label_values(&[job, status]).inc();
    }
    if let Some(histogram) = JOB_DURATION.get() {
        histogram.with_label_values(&[job]).observe(duration_secs);
    }
}

/// Record a gateway charge attempt.
pub fn record_gateway_charge(kind: &str, outcome: &str) {
    if let Some(counter) = GATEWAY_CHARGES_TOTAL.get() {
        counter.with_label_values(&[kind, outcome]).inc();
    }
}

/// Record an amount collected.
pub fn record_charged_amount(kind: &str, amount: Decimal) {
    if let Some(counter) = CHARGED_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[kind])
            .inc_by(amount.abs().to_f64().unwrap_or_default());
    }
}

/// Record stores losing access.
pub fn record_stores_blocked(reason: &str, count: usize) {
    if let Some(counter) = STORES_BLOCKED_TOTAL.get() {
        counter.with_label_values(&[reason]).inc_by(count as u64);
    }
}

/// Record a ledger append.
pub fn record_ledger_entry(kind: &str, status: &str) {
    if let Some(counter) = LEDGER_ENTRIES_TOTAL.get() {
        counter.with_label_values(&[kind, status]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, job: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, job]).inc();
    }
}
