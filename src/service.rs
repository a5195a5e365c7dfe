//! HTTP surface: WebSocket upgrade, health and metrics endpoints

use crate::coordinator::MatchCoordinator;
use crate::error::{CoordinatorError, Result};
use crate::gateway::ws::{handle_socket, WsGateway};
use crate::metrics::MetricsCollector;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MatchCoordinator>,
    pub gateway: Arc<WsGateway>,
    pub metrics: Arc<MetricsCollector>,
    pub service_name: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind and serve until the shutdown future resolves
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        CoordinatorError::ConfigurationError {
            message: format!("Failed to bind {}: {}", addr, e),
        }
    })?;
    info!("Listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            CoordinatorError::InternalError {
                message: format!("Server error: {}", e),
            }
            .into()
        })
}

async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| {
        handle_socket(socket, state.gateway.clone(), state.coordinator.clone())
    })
}

async fn health_handler(State(state): State<AppState>) -> Response {
    match state.coordinator.stats() {
        Ok(stats) => Json(json!({
            "status": "healthy",
            "service": state.service_name,
            "users_waiting": stats.users_waiting,
            "active_offers": stats.active_offers,
            "active_sessions": stats.active_sessions,
            "connected_sockets": state.gateway.connected_count(),
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy" })),
            )
                .into_response()
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry().gather();
    let mut buffer = Vec::new();
    match encoder.encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            buffer,
        )
            .into_response(),
        Err(e) => {
            error!("Metric encoding failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchmakingSettings;
    use crate::question::StaticQuestionSelector;

    fn create_test_state() -> AppState {
        let gateway = Arc::new(WsGateway::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let coordinator = Arc::new(MatchCoordinator::new(
            gateway.clone(),
            Arc::new(StaticQuestionSelector::new()),
            MatchmakingSettings::default(),
            metrics.clone(),
        ));
        AppState {
            coordinator,
            gateway,
            metrics,
            service_name: "practice-room-test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = create_test_state();
        let response = health_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_encodes() {
        let state = create_test_state();
        state.metrics.requests_total.inc();
        let response = metrics_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
