//! Health check endpoint.
//!
//! Answers as long as the receiver's HTTP listener is up. Delivery problems show up
//! in `/internal/stats`, not here.

use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (always "healthy" if reachable).
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Receiver that owns this listener.
    pub receiver: String,
    /// Ids of the running exporters.
    pub exporters: Vec<String>,
}

/// Creates the health check routes.
pub fn health_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "telepipe-collector",
        version: env!("CARGO_PKG_VERSION"),
        receiver: state.receiver().id().to_string(),
        exporters: state.exporters().ids().map(str::to_string).collect(),
    })
}
