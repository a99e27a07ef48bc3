//! Health check handler

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::application::services::SharedGatewayService;

#[derive(Clone)]
pub struct HealthState {
    pub gateway: SharedGatewayService,
    pub started_at: Arc<Instant>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_charge_points: usize,
    pub online_charge_points: usize,
    pub viewer_subscriptions: usize,
}

/// `GET /health`
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.gateway.stats();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            connected_charge_points: stats.registry.total_charge_points,
            online_charge_points: stats.liveness.online_charge_points,
            viewer_subscriptions: stats.viewers.active_subscriptions,
        }),
    )
}
