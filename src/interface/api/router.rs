//! API Router configuration

use super::call_handler::{
    answer_call, end_call, get_active_call, get_call, get_stats, health_check, initiate_call,
    list_calls, reject_call, AppState,
};
use super::metrics::metrics_handler;
use super::signaling::signaling_ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    // Health check route (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    // Call management routes
    let call_routes = Router::new()
        .route("/calls", post(initiate_call).get(list_calls))
        .route("/calls/stats", get(get_stats))
        .route("/calls/active/:user_id", get(get_active_call))
        .route("/calls/:call_id", get(get_call))
        .route("/calls/:call_id/answer", post(answer_call))
        .route("/calls/:call_id/reject", post(reject_call))
        .route("/calls/:call_id/end", post(end_call));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    // Signaling WebSocket route (separate state)
    let ws_routes = Router::new()
        .route("/ws", get(signaling_ws_handler))
        .with_state(state.signaling.clone());

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .with_state(state)
        .merge(metrics_routes)
        .merge(ws_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
