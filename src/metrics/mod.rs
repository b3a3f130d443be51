//! Prometheus metrics for monitoring.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`install_prometheus`] installs a recorder.

use std::time::Instant;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{Error, Result};

pub const REQUESTS_TOTAL: &str = "mcp_requests_total";
pub const TOOL_DURATION_SECONDS: &str = "mcp_tool_duration_seconds";
pub const LIVE_SESSIONS: &str = "mcp_live_sessions";
pub const BROADCAST_DELIVERIES_TOTAL: &str = "mcp_broadcast_deliveries_total";
pub const BROADCAST_PRUNED_TOTAL: &str = "mcp_broadcast_pruned_total";

/// Install the global Prometheus recorder and return the handle used to render it.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::Config(format!("failed to install metrics recorder: {}", e)))
}

/// Count one handled request.
pub fn record_request(method: &str, outcome: &'static str) {
    counter!(REQUESTS_TOTAL, "method" => method.to_string(), "outcome" => outcome).increment(1);
}

/// Record how long a tool call took.
pub fn record_tool_call(tool: &str, seconds: f64) {
    histogram!(TOOL_DURATION_SECONDS, "tool" => tool.to_string()).record(seconds);
}

pub fn set_live_sessions(count: usize) {
    gauge!(LIVE_SESSIONS).set(count as f64);
}

/// Record the outcome of one catalog-changed broadcast.
pub fn record_broadcast(delivered: usize, pruned: usize) {
    counter!(BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
    counter!(BROADCAST_PRUNED_TOTAL).increment(pruned as u64);
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Get elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
