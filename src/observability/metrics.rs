//! Metrics collection and exposition.
//!
//! # Metrics
//! - `policy_config_loads_total` (counter): configuration loads by result
//! - `policy_config_applies_total` (counter): applies by result
//! - `policy_runtime_writes_total` (counter): runtime store writes by result
//! - `policy_config_reloads_total` (counter): watcher reloads by result
//!
//! # Design Decisions
//! - A single `result` label (`ok` / `error`)
//! - Exposition is opt-in; the binary installs the Prometheus exporter

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub fn record_config_load(result: &'static str) {
    ::metrics::counter!("policy_config_loads_total", "result" => result).increment(1);
}

pub fn record_config_apply(result: &'static str) {
    ::metrics::counter!("policy_config_applies_total", "result" => result).increment(1);
}

pub fn record_runtime_write(result: &'static str) {
    ::metrics::counter!("policy_runtime_writes_total", "result" => result).increment(1);
}

pub fn record_config_reload(result: &'static str) {
    ::metrics::counter!("policy_config_reloads_total", "result" => result).increment(1);
}

/// Install the Prometheus exporter listening on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
