//! Metrics instrumentation for the dataplane sidecar.
//!
//! Components never touch a global registry directly: each one is handed a
//! [`MetricsSink`] at construction. [`RecorderSink`] forwards to the `metrics`
//! facade; tests swap in an in-memory sink.
//!
//! All metrics are prefixed with `dataplane.`

use metrics::{counter, gauge};
use std::sync::Arc;

/// Liveness of the proxied discovery stream (1 = exchanging messages).
pub const DISCOVERY_CONNECTED: &str = "dataplane.discovery.connected";
/// DNS exchanges received, UDP and TCP.
pub const DNS_REQUEST_COUNT: &str = "dataplane.dns.request.count";
/// DNS exchanges dropped because the backend call or the reply failed.
pub const DNS_REQUEST_FAILED_COUNT: &str = "dataplane.dns.request.failed.count";
/// Graceful shutdown requests received.
pub const SHUTDOWN_COUNT: &str = "dataplane.lifecycle.shutdown.count";

/// Destination for the sidecar's own metrics.
pub trait MetricsSink: Send + Sync + 'static {
    /// Set a gauge to an absolute value.
    fn gauge(&self, name: &'static str, value: f64);

    /// Increment a counter.
    fn counter(&self, name: &'static str, increment: u64);
}

/// Shared handle to a metrics sink.
pub type SharedSink = Arc<dyn MetricsSink>;

/// Sink backed by the process-wide `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl RecorderSink {
    /// Create a shared handle to the recorder sink.
    pub fn shared() -> SharedSink {
        Arc::new(Self)
    }
}

impl MetricsSink for RecorderSink {
    fn gauge(&self, name: &'static str, value: f64) {
        gauge!(name).set(value);
    }

    fn counter(&self, name: &'static str, increment: u64) {
        counter!(name).increment(increment);
    }
}

/// Record the liveness of the discovery stream.
pub fn record_discovery_liveness(sink: &dyn MetricsSink, alive: bool) {
    sink.gauge(DISCOVERY_CONNECTED, if alive { 1.0 } else { 0.0 });
}

/// Record a DNS exchange and whether it failed.
pub fn record_dns_request(sink: &dyn MetricsSink, result: RequestResult) {
    sink.counter(DNS_REQUEST_COUNT, 1);
    if let RequestResult::Failed = result {
        sink.counter(DNS_REQUEST_FAILED_COUNT, 1);
    }
}

/// Outcome of a single DNS exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestResult {
    /// Backend answered and the reply was written.
    Success,
    /// Backend call or reply write failed.
    Failed,
}

/// Record a graceful shutdown request.
pub fn record_shutdown(sink: &dyn MetricsSink) {
    sink.counter(SHUTDOWN_COUNT, 1);
}
