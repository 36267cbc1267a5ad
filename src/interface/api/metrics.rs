//! Prometheus metrics

use crate::domain::call::value_object::CallStatus;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize the Prometheus metrics exporter
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_gauge!("intercom_active_calls", "Number of currently active calls");
    describe_gauge!("intercom_online_users", "Number of users with at least one live connection");
    describe_gauge!("intercom_connected_visitors", "Number of connected anonymous visitors");
    describe_counter!("intercom_calls_total", "Total number of calls initiated");
    describe_counter!(
        "intercom_calls_resolved",
        "Total number of calls reaching a terminal status, labeled by outcome"
    );

    handle
}

/// HTTP metrics handler
pub async fn metrics_handler(
    axum::extract::State(prometheus_handle): axum::extract::State<PrometheusHandle>,
) -> Response {
    let metrics = prometheus_handle.render();
    (StatusCode::OK, metrics).into_response()
}

/// Update active calls gauge
pub fn update_active_calls(count: i64) {
    gauge!("intercom_active_calls").set(count as f64);
}

/// Update connection gauges
pub fn update_connections(online_users: usize, connected_visitors: usize) {
    gauge!("intercom_online_users").set(online_users as f64);
    gauge!("intercom_connected_visitors").set(connected_visitors as f64);
}

/// Record a call initiation
pub fn record_call_initiated() {
    counter!("intercom_calls_total").increment(1);
}

/// Record a call reaching a terminal status
pub fn record_call_resolved(status: CallStatus) {
    counter!("intercom_calls_resolved", "outcome" => status.as_str()).increment(1);
}
