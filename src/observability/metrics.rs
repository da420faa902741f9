//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define per-call metrics
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `grpcweb_calls_total` (counter): completed calls by method, status code
//! - `grpcweb_call_duration_seconds` (histogram): time from decode to trailer
//! - `grpcweb_calls_cancelled_total` (counter): calls abandoned by the client
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels carry the method path and the gRPC code name
//! - Method paths come from clients, so only the first `MAX_METHOD_LABELS`
//!   distinct paths get their own series; the rest share `other`

use std::net::SocketAddr;
use std::time::Instant;

use dashmap::DashSet;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::grpc_web::status::Code;

/// Distinct method labels kept before new methods collapse into [`OTHER_METHOD`].
pub const MAX_METHOD_LABELS: usize = 256;

/// Label shared by every method past the cap.
pub const OTHER_METHOD: &str = "other";

/// Bounded set of method labels seen so far.
#[derive(Debug)]
pub struct MethodLabels {
    seen: DashSet<String>,
    limit: usize,
}

impl MethodLabels {
    pub fn new(limit: usize) -> Self {
        Self {
            seen: DashSet::new(),
            limit,
        }
    }

    /// Metric label for `method`. Known methods keep their label; new ones
    /// get one while there is room.
    pub fn label(&self, method: &str) -> String {
        if self.seen.contains(method) {
            return method.to_string();
        }
        if self.seen.len() < self.limit {
            self.seen.insert(method.to_string());
            return method.to_string();
        }
        OTHER_METHOD.to_string()
    }
}

impl Default for MethodLabels {
    fn default() -> Self {
        Self::new(MAX_METHOD_LABELS)
    }
}

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a call that reached its trailer frame.
pub fn record_call(method: &str, code: Code, started: Instant) {
    metrics::counter!(
        "grpcweb_calls_total",
        "method" => method.to_string(),
        "code" => code.as_str()
    )
    .increment(1);
    metrics::histogram!("grpcweb_call_duration_seconds", "method" => method.to_string())
        .record(started.elapsed().as_secs_f64());
}

/// Record a call whose client disconnected before the trailer frame.
pub fn record_cancelled(method: &str) {
    metrics::counter!("grpcweb_calls_cancelled_total", "method" => method.to_string()).increment(1);
}
