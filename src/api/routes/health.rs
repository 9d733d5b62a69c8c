//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/v1/health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let mode = match state.registry() {
        Some(_) => "cluster",
        None => "single",
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now(),
        mode: mode.to_string(),
        subscribers: state.room.subscribers().await,
    })
}
