//! Alert endpoints

use axum::{
    Json,
    extract::{Path, Query, State},
};
use tracing::info;

use crate::alerts::{Alert, AlertId};
use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AlertLogResponse, AlertsResponse, LogQuery, SnoozeRequest},
};

/// Longest snooze accepted
const MAX_SNOOZE_SECS: u64 = 7 * 24 * 60 * 60;

const DEFAULT_LOG_LIMIT: usize = 100;

/// GET /api/v1/alerts
pub async fn list_alerts(State(state): State<ApiState>) -> Json<AlertsResponse> {
    let (alerts, needs_attention) = state.room.alerts().await;
    Json(AlertsResponse {
        alerts,
        needs_attention,
    })
}

/// POST /api/v1/alerts/:id/snooze
pub async fn snooze(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
    Json(request): Json<SnoozeRequest>,
) -> ApiResult<Json<Alert>> {
    if request.seconds == 0 || request.seconds > MAX_SNOOZE_SECS {
        return Err(ApiError::InvalidRequest(format!(
            "snooze must be between 1 and {MAX_SNOOZE_SECS} seconds"
        )));
    }

    let duration = chrono::Duration::seconds(request.seconds as i64);
    let alert = state.room.snooze(id, duration).await?;
    info!("alert {id} snoozed for {}s", request.seconds);
    Ok(Json(alert))
}

/// POST /api/v1/alerts/:id/acknowledge
pub async fn acknowledge(
    State(state): State<ApiState>,
    Path(id): Path<AlertId>,
) -> ApiResult<Json<Alert>> {
    let alert = state.room.acknowledge(id).await?;
    info!("alert {id} acknowledged");
    Ok(Json(alert))
}

/// GET /api/v1/alerts/log?limit=n
///
/// Reads back the durable log, which outlives restarts.
pub async fn read_log(
    State(state): State<ApiState>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<AlertLogResponse>> {
    let Some(log) = state.room.alert_log().await else {
        return Err(ApiError::Unsupported("no alert log configured".to_string()));
    };

    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let records = tokio::task::spawn_blocking(move || log.read_recent(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(AlertLogResponse { records }))
}
