//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (connections, transfers, bytes, rejections)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `relay_connections_accepted_total` (counter)
//! - `relay_pending_connections` (gauge): sockets without a full header
//! - `relay_transfers_active` (gauge): entries in the transfer registry
//! - `relay_transfers_created_total` (counter)
//! - `relay_transfers_completed_total` (counter)
//! - `relay_transfers_evicted_total` (counter)
//! - `relay_bytes_forwarded_total` (counter)
//! - `relay_requests_rejected_total` (counter): by reason
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so the relay
//!   engine records unconditionally

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    counter!("relay_connections_accepted_total").increment(1);
}

pub fn set_pending_connections(count: u64) {
    gauge!("relay_pending_connections").set(count as f64);
}

pub fn set_active_transfers(count: usize) {
    gauge!("relay_transfers_active").set(count as f64);
}

pub fn record_transfer_created() {
    counter!("relay_transfers_created_total").increment(1);
}

pub fn record_transfer_completed() {
    counter!("relay_transfers_completed_total").increment(1);
}

pub fn record_transfers_evicted(count: usize) {
    counter!("relay_transfers_evicted_total").increment(count as u64);
}

pub fn record_bytes_forwarded(bytes: usize) {
    counter!("relay_bytes_forwarded_total").increment(bytes as u64);
}

/// Count a request answered with a rejection or dropped.
pub fn record_rejected(reason: &'static str) {
    counter!("relay_requests_rejected_total", "reason" => reason).increment(1);
}
