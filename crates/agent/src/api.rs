//! HTTP API for health checks, Prometheus metrics, and pressure state

use axum::{
    extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router,
};
use eviction_lib::health::{HealthTracker, ProbeStatus};
use eviction_lib::manager::EvictionManager;
use eviction_lib::observability::EvictionMetrics;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health: Arc<HealthTracker>,
    pub metrics: EvictionMetrics,
    pub manager: Arc<EvictionManager>,
}

impl AppState {
    pub fn new(
        health: Arc<HealthTracker>,
        metrics: EvictionMetrics,
        manager: Arc<EvictionManager>,
    ) -> Self {
        Self {
            health,
            metrics,
            manager,
        }
    }
}

/// Health check response - returns 200 while probes hold, 503 once one
/// keeps failing
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health.health();

    let status_code = match health.status {
        ProbeStatus::Ok => StatusCode::OK,
        ProbeStatus::Degraded => StatusCode::OK, // Still operational
        ProbeStatus::Failing => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Current node pressure conditions
async fn pressure(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.pressure_status())
}

/// Last synchronized signal observations
async fn observations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.manager.latest_observations())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/pressure", get(pressure))
        .route("/observations", get(observations))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
