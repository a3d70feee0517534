use metrics::{counter, gauge, histogram, describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::error::{AppError, Result};

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Global metrics instance.
pub static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Counter incremented whenever money moved externally but the local commit failed.
pub const INTERNAL_INCONSISTENCY_TOTAL: &str = "settlement_internal_inconsistency_total";

/// Metrics collector for settlement and booking lifecycle.
#[derive(Debug, Clone)]
pub struct Metrics {
    initialized: bool,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self { initialized: true }
    }

    pub fn record_settlement_outcome(&self, category: &str, outcome: &str) {
        counter!("settlement_outcomes_total", "category" => category.to_string(), "outcome" => outcome.to_string()).increment(1);
    }

    pub fn record_settlement_latency(&self, category: &str, duration_ms: f64) {
        histogram!("settlement_duration_ms", "category" => category.to_string()).record(duration_ms);
    }

    pub fn record_gateway_call(&self, operation: &str, success: bool, duration_ms: f64) {
        counter!("gateway_requests_total", "operation" => operation.to_string(), "success" => success.to_string()).increment(1);
        histogram!("gateway_request_duration_ms", "operation" => operation.to_string()).record(duration_ms);
    }

    pub fn record_internal_inconsistency(&self, category: &str) {
        counter!(INTERNAL_INCONSISTENCY_TOTAL, "category" => category.to_string()).increment(1);
    }

    pub fn record_booking_transition(&self, from: &str, to: &str, source: &str) {
        counter!("booking_transitions_total", "from" => from.to_string(), "to" => to.to_string(), "source" => source.to_string()).increment(1);
    }

    pub fn record_booking_materialized(&self, created: bool) {
        counter!("booking_materializations_total", "created" => created.to_string()).increment(1);
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        counter!("settlement_reconciliations_total", "outcome" => outcome.to_string()).increment(1);
    }

    pub fn set_open_discrepancies(&self, count: usize) {
        gauge!("settlement_open_discrepancies").set(count as f64);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string(), "status" => status.to_string()).increment(1);
        histogram!("http_request_duration_ms", "method" => method.to_string(), "path" => path.to_string()).record(duration_ms);
    }

    pub fn record_kafka_message(&self, topic: &str, success: bool) {
        counter!("kafka_messages_total", "topic" => topic.to_string(), "success" => success.to_string()).increment(1);
    }
}

/// Timer for measuring operation latency.
pub struct LatencyTimer {
    start: Instant,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for LatencyTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the Prometheus recorder once and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e)))?;
    describe_metrics();

    let handle = METRICS_HANDLE.get_or_init(|| handle).clone();
    METRICS.get_or_init(Metrics::new);

    Ok(handle)
}

/// Describes all metrics for Prometheus.
fn describe_metrics() {
    describe_counter!("settlement_outcomes_total", Unit::Count, "Settlement attempts by invoice category and outcome");
    describe_histogram!("settlement_duration_ms", Unit::Milliseconds, "End-to-end settlement latency in milliseconds");
    describe_counter!(INTERNAL_INCONSISTENCY_TOTAL, Unit::Count, "Charges that succeeded at the gateway but failed to commit locally");

    describe_counter!("gateway_requests_total", Unit::Count, "Total payment gateway requests");
    describe_histogram!("gateway_request_duration_ms", Unit::Milliseconds, "Payment gateway latency in milliseconds");

    describe_counter!("booking_transitions_total", Unit::Count, "Applied booking status transitions");
    describe_counter!("booking_materializations_total", Unit::Count, "Bookings materialized from paid invoices");

    describe_counter!("settlement_reconciliations_total", Unit::Count, "Discrepancy reconciliation outcomes");
    describe_gauge!("settlement_open_discrepancies", Unit::Count, "Open discrepancies seen by the last reconciliation run");

    describe_counter!("http_requests_total", Unit::Count, "Total HTTP requests");
    describe_histogram!("http_request_duration_ms", Unit::Milliseconds, "HTTP request latency in milliseconds");

    describe_counter!("kafka_messages_total", Unit::Count, "Total Kafka messages");
}

/// Returns the global metrics instance.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}
