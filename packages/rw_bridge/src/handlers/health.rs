use axum::{Json, extract::State, response::IntoResponse};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns bridge status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let active_leases = state.registry.len().await as u64;
    let listeners = state.broadcaster.len().await as u64;

    let status = if snapshot.backend_errors == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        connections: snapshot.connections.active,
        active_leases,
        listeners,
        backend: state.pool.config().addr.clone(),
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
