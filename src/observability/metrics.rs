//! Metrics collection and exposition.
//!
//! # Metrics
//! - `sync_reconcile_total` (counter): reconciliations by outcome
//! - `sync_reconcile_duration_seconds` (histogram): time spent per reconciliation
//! - `sync_generation` (gauge): last apply attempt number
//! - `sync_config_error` (gauge): 1 while an unresolved sync error exists
//! - `sync_notifications_total` (counter): bus announcements by acceptance

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_reconcile(outcome: &'static str, started: Instant) {
    counter!("sync_reconcile_total", "outcome" => outcome).increment(1);
    histogram!("sync_reconcile_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_generation(generation: u64) {
    gauge!("sync_generation").set(generation as f64);
}

pub fn record_config_error(active: bool) {
    gauge!("sync_config_error").set(if active { 1.0 } else { 0.0 });
}

pub fn record_notification(accepted: bool) {
    let accepted = if accepted { "true" } else { "false" };
    counter!("sync_notifications_total", "accepted" => accepted).increment(1);
}
