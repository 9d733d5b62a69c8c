//! Threshold endpoints

use axum::{Json, extract::State};
use tracing::info;

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::thresholds::ThresholdConfig;

/// GET /api/v1/thresholds
pub async fn get_thresholds(State(state): State<ApiState>) -> Json<ThresholdConfig> {
    Json(state.room.thresholds().await)
}

/// PUT /api/v1/thresholds
///
/// Validates the new set, persists it when a threshold file is configured
/// and hands it to the engine for the next tick.
pub async fn put_thresholds(
    State(state): State<ApiState>,
    Json(thresholds): Json<ThresholdConfig>,
) -> ApiResult<Json<ThresholdConfig>> {
    match &state.thresholds_path {
        Some(path) => thresholds.save(path)?,
        None => thresholds.validate()?,
    }

    state.room.set_thresholds(thresholds.clone()).await;
    info!("thresholds updated ({} metrics)", thresholds.len());
    Ok(Json(thresholds))
}

/// POST /api/v1/thresholds/reload
pub async fn reload_thresholds(
    State(state): State<ApiState>,
) -> ApiResult<Json<ThresholdConfig>> {
    let Some(path) = &state.thresholds_path else {
        return Err(ApiError::InvalidRequest(
            "no thresholds file configured".to_string(),
        ));
    };

    let thresholds = ThresholdConfig::load(path)?;
    state.room.set_thresholds(thresholds.clone()).await;
    info!("thresholds reloaded from {}", path.display());
    Ok(Json(thresholds))
}
