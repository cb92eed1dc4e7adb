// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

// NOTE: When the observability feature is disabled, provide stub macros so the
// helper functions below compile to nothing.
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "pricing_requests_total",
        Unit::Count,
        "Quote requests received, labeled by outcome (ok, validation, unknown_route, rate_limited, service_unavailable, cancelled)."
    );
    describe_counter!(
        "pricing_cache_hits_total",
        Unit::Count,
        "Response cache hits, labeled by tier (local, remote)."
    );
    describe_counter!(
        "pricing_cache_miss_total",
        Unit::Count,
        "Response cache misses."
    );
    describe_counter!(
        "pricing_fallback_total",
        Unit::Count,
        "Responses served by a fallback strategy, labeled by layer."
    );
    describe_counter!(
        "pricing_validation_errors_total",
        Unit::Count,
        "Request validation failures, labeled by field."
    );
    describe_counter!(
        "pricing_breaker_transitions_total",
        Unit::Count,
        "Circuit breaker state transitions, labeled by client and edge."
    );
    describe_counter!(
        "pricing_breaker_short_circuits_total",
        Unit::Count,
        "Fetches rejected without dialing because the breaker was open."
    );
    describe_gauge!(
        "pricing_breaker_state",
        "Current breaker state per client (0=closed, 1=open, 2=half_open)."
    );
    describe_counter!(
        "pricing_correctness_alerts_total",
        Unit::Count,
        "Calculator invariant violations (NaN or negative totals) that forced a fallback."
    );
    describe_counter!(
        "pricing_snapshot_fields_total",
        Unit::Count,
        "Snapshot field resolutions, labeled by field and freshness (fresh, stale, missing)."
    );
    describe_histogram!(
        "pricing_request_duration_ms",
        "End-to-end quote latency in milliseconds."
    );
    describe_histogram!(
        "pricing_snapshot_duration_ms",
        "Market snapshot assembly latency in milliseconds."
    );
    describe_histogram!(
        "pricing_strategy_duration_ms",
        "Per-fallback-strategy latency in milliseconds, labeled by layer."
    );
    describe_gauge!(
        "pricing_local_cache_entries",
        "Entries currently held by the local response-cache tier."
    );
}

// --- Helper functions to update metrics ---

pub fn increment_quote_request(outcome: &str) {
    counter!("pricing_requests_total", 1, "outcome" => outcome.to_string());
}

pub fn increment_cache_hit(tier: &str) {
    counter!("pricing_cache_hits_total", 1, "tier" => tier.to_string());
}

pub fn increment_cache_miss() {
    counter!("pricing_cache_miss_total", 1);
}

pub fn increment_fallback_used(layer: &str) {
    counter!("pricing_fallback_total", 1, "layer" => layer.to_string());
}

pub fn increment_validation_error(field: &str) {
    counter!("pricing_validation_errors_total", 1, "field" => field.to_string());
}

pub fn increment_breaker_transition(client: &str, from: &str, to: &str) {
    counter!(
        "pricing_breaker_transitions_total",
        1,
        "client" => client.to_string(),
        "edge" => format!("{from}->{to}")
    );
}

pub fn increment_breaker_short_circuit(client: &str) {
    counter!("pricing_breaker_short_circuits_total", 1, "client" => client.to_string());
}

pub fn set_breaker_state(client: &str, state: f64) {
    gauge!("pricing_breaker_state", state, "client" => client.to_string());
}

pub fn increment_correctness_alert(reason: &str) {
    counter!("pricing_correctness_alerts_total", 1, "reason" => reason.to_string());
}

pub fn increment_snapshot_field(field: &str, freshness: &str) {
    counter!(
        "pricing_snapshot_fields_total",
        1,
        "field" => field.to_string(),
        "freshness" => freshness.to_string()
    );
}

pub fn record_request_duration(duration: std::time::Duration) {
    histogram!("pricing_request_duration_ms", duration.as_secs_f64() * 1000.0);
}

pub fn record_snapshot_duration(duration: std::time::Duration) {
    histogram!("pricing_snapshot_duration_ms", duration.as_secs_f64() * 1000.0);
}

pub fn record_strategy_duration(layer: &str, duration: std::time::Duration) {
    histogram!(
        "pricing_strategy_duration_ms",
        duration.as_secs_f64() * 1000.0,
        "layer" => layer.to_string()
    );
}

pub fn set_local_cache_entries(count: f64) {
    gauge!("pricing_local_cache_entries", count);
}
