//! Node endpoints (hub only)

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{NodeInfo, NodeRequest},
};
use crate::cluster::{ClusterSnapshot, build_view};
use crate::registry::NodeRegistry;

fn registry(state: &ApiState) -> ApiResult<&NodeRegistry> {
    state
        .registry()
        .ok_or_else(|| ApiError::Unsupported("not running as a hub".to_string()))
}

/// GET /api/v1/nodes
///
/// Returns the merged cluster view.
pub async fn list_nodes(State(state): State<ApiState>) -> ApiResult<Json<ClusterSnapshot>> {
    Ok(Json(build_view(registry(&state)?).await))
}

/// POST /api/v1/nodes
pub async fn register_node(
    State(state): State<ApiState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<(StatusCode, Json<NodeInfo>)> {
    let url = request.url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(ApiError::InvalidRequest(format!(
            "node url must use ws:// or wss://, got `{url}`"
        )));
    }

    let registry = registry(&state)?;
    let id = registry.register(url).await;
    let node = registry
        .get(id)
        .await
        .ok_or_else(|| ApiError::Internal(format!("{id} vanished after registration")))?;

    Ok((
        StatusCode::CREATED,
        Json(NodeInfo {
            id: node.id,
            url: node.url,
            display_name: node.display_name,
            status: node.status,
            last_update: node.last_update,
        }),
    ))
}

/// DELETE /api/v1/nodes
pub async fn deregister_node(
    State(state): State<ApiState>,
    Json(request): Json<NodeRequest>,
) -> ApiResult<StatusCode> {
    if registry(&state)?.deregister(request.url.trim()).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("node {} not registered", request.url)))
    }
}
