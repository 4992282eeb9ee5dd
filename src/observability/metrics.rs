//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define manager metrics (instance lifecycle, status, connections)
//! - Expose a Prometheus-compatible scrape endpoint when enabled
//!
//! # Metrics
//! - `sqlproxy_instances_started_total` (counter): successful starts by instance
//! - `sqlproxy_instances_running` (gauge): instances currently holding resources
//! - `sqlproxy_connections_accepted_total` (counter): accepted client connections by endpoint
//! - `sqlproxy_status_transitions_total` (counter): applied transitions by status
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Labels for instance, endpoint and status
//! - Recording without an installed exporter is a no-op

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::instance::Status;

/// Install the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_instance_started(instance: &str) {
    counter!("sqlproxy_instances_started_total", "instance" => instance.to_string()).increment(1);
    gauge!("sqlproxy_instances_running").increment(1.0);
}

pub fn record_instance_stopped() {
    gauge!("sqlproxy_instances_running").decrement(1.0);
}

pub fn record_connection_accepted(endpoint: &str) {
    counter!("sqlproxy_connections_accepted_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

pub fn record_status(status: Status) {
    counter!("sqlproxy_status_transitions_total", "status" => status.as_str()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_exporter_is_noop() {
        record_instance_started("p:r:db");
        record_connection_accepted("p:r:db");
        record_status(Status::Connected);
        record_instance_stopped();
    }
}
