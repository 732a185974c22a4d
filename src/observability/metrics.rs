//! Metrics collection and exposition.
//!
//! # Metrics
//! - `distributor_connections_accepted_total` (counter)
//! - `distributor_connections_closed_total` (counter): by reason
//!   (teardown, late, worker_removed, overflow)
//! - `distributor_handoffs_total` (counter): by outcome
//!   (sent, accepted, rejected, discarded, send_failed)
//! - `distributor_relocations_total` (counter)
//! - `distributor_workers` (gauge)
//! - `distributor_queued_connections` (gauge)

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    counter!("distributor_connections_accepted_total").increment(1);
}

pub fn record_closed(reason: &'static str, count: usize) {
    counter!("distributor_connections_closed_total", "reason" => reason).increment(count as u64);
}

pub fn record_handoff(outcome: &'static str) {
    counter!("distributor_handoffs_total", "outcome" => outcome).increment(1);
}

pub fn record_relocation() {
    counter!("distributor_relocations_total").increment(1);
}

/// Current pool size and total queue depth.
pub fn record_pool(workers: usize, queued: usize) {
    gauge!("distributor_workers").set(workers as f64);
    gauge!("distributor_queued_connections").set(queued as f64);
}
