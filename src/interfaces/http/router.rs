//! Gateway HTTP router

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use super::modules::{health, metrics};
use crate::application::services::SharedGatewayService;
use crate::interfaces::ws::{ws_viewer_handler, ViewerState};

/// Viewer WebSocket route plus `/health`, and `/metrics` when a Prometheus
/// handle is given.
pub fn create_router(gateway: SharedGatewayService, prometheus: Option<PrometheusHandle>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health_check))
        .with_state(health::HealthState {
            gateway: gateway.clone(),
            started_at: Arc::new(Instant::now()),
        });

    let viewer_routes = Router::new()
        .route("/{charge_point_id}/{connector_id}", get(ws_viewer_handler))
        .with_state(ViewerState { gateway });

    let mut router = Router::new().merge(health_routes).merge(viewer_routes);

    if let Some(handle) = prometheus {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics::prometheus_metrics))
            .with_state(metrics::MetricsState { handle });
        router = router.merge(metrics_routes);
    }

    router
        .layer(middleware::from_fn(metrics::http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
}
