//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define call-layer metrics (calls, attempts, latency, breaker activity)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-dependency metrics
//!
//! # Metrics
//! - `link_calls_total` (counter): logical calls by dependency, result
//! - `link_attempts_total` (counter): attempts by dependency, outcome
//! - `link_call_duration_seconds` (histogram): end-to-end call latency
//! - `link_breaker_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `link_breaker_transitions_total` (counter): transitions by target state
//! - `link_breaker_rejections_total` (counter): calls short-circuited
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Labels are dependency names, never per-request values

use std::net::SocketAddr;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One finished logical call.
pub fn record_call(dependency: &str, result: &'static str, started: Instant) {
    ::metrics::counter!(
        "link_calls_total",
        "dependency" => dependency.to_string(),
        "result" => result
    )
    .increment(1);

    ::metrics::histogram!(
        "link_call_duration_seconds",
        "dependency" => dependency.to_string()
    )
    .record(started.elapsed().as_secs_f64());
}

/// One attempt against a downstream.
pub fn record_attempt(dependency: &str, outcome: &'static str) {
    ::metrics::counter!(
        "link_attempts_total",
        "dependency" => dependency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// A breaker starts closed; publish its state before the first transition.
pub fn record_breaker_created(dependency: &str) {
    set_breaker_state(dependency, "closed");
}

pub fn record_breaker_transition(dependency: &str, to: &'static str) {
    ::metrics::counter!(
        "link_breaker_transitions_total",
        "dependency" => dependency.to_string(),
        "to" => to
    )
    .increment(1);

    set_breaker_state(dependency, to);
}

fn set_breaker_state(dependency: &str, state: &str) {
    let level = match state {
        "closed" => 0.0,
        "half_open" => 1.0,
        _ => 2.0,
    };
    ::metrics::gauge!("link_breaker_state", "dependency" => dependency.to_string()).set(level);
}

pub fn record_breaker_rejection(dependency: &str) {
    ::metrics::counter!(
        "link_breaker_rejections_total",
        "dependency" => dependency.to_string()
    )
    .increment(1);
}
