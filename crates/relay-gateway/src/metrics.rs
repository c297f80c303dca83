//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the metrics endpoint.
/// Must be called once at process startup before any metrics are
/// recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Calls entering the pipeline (counter, labels: method, client).
pub const RPC_CALLS_TOTAL: &str = "rpc_calls_total";
/// Failed calls (counter, labels: method, error_type).
pub const RPC_ERRORS_TOTAL: &str = "rpc_errors_total";
/// Call duration through the pipeline (histogram, labels: method).
pub const RPC_CALL_DURATION_SECONDS: &str = "rpc_call_duration_seconds";
/// Connections opened total (counter).
pub const CONNECTIONS_TOTAL: &str = "gateway_connections_total";
/// Connections closed total (counter).
pub const DISCONNECTIONS_TOTAL: &str = "gateway_disconnections_total";
/// Currently open connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "gateway_connection_duration_seconds";
/// Live client contexts (gauge).
pub const CLIENT_CONTEXTS_ACTIVE: &str = "client_contexts_active";
