use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sessions: usize,
    pub active_games: usize,
}

/// GET /health — server status and live gauges. Unauthenticated.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.hub.stats();
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        sessions: stats.sessions,
        active_games: stats.active_games,
    })
}
