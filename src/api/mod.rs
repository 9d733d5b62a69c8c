//! Control surface and dashboard stream
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Health check
//! - `WS /api/v1/stream` - Live frames of the room
//! - `GET /api/v1/alerts` - Current alerts
//! - `POST /api/v1/alerts/:id/snooze` - Snooze an active alert
//! - `POST /api/v1/alerts/:id/acknowledge` - Acknowledge an alert
//! - `GET /api/v1/alerts/log` - Recent entries of the alert log
//! - `GET|PUT /api/v1/thresholds` - Read or replace thresholds
//! - `POST /api/v1/thresholds/reload` - Re-read the threshold file
//! - `GET|POST|DELETE /api/v1/nodes` - Cluster view and node registration (hub only)

pub mod error;
pub mod routes;
pub mod state;
pub mod types;
pub mod websocket;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::sync::watch;
use tracing::{error, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboards served from elsewhere
    pub enable_cors: bool,
}

impl ApiConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            enable_cors: true,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route("/api/v1/alerts/log", get(routes::alerts::read_log))
        .route("/api/v1/alerts/:id/snooze", post(routes::alerts::snooze))
        .route(
            "/api/v1/alerts/:id/acknowledge",
            post(routes::alerts::acknowledge),
        )
        .route(
            "/api/v1/thresholds",
            get(routes::thresholds::get_thresholds).put(routes::thresholds::put_thresholds),
        )
        .route(
            "/api/v1/thresholds/reload",
            post(routes::thresholds::reload_thresholds),
        );

    if state.room.registry().is_some() {
        app = app.route(
            "/api/v1/nodes",
            get(routes::nodes::list_nodes)
                .post(routes::nodes::register_node)
                .delete(routes::nodes::deregister_node),
        );
    }

    app.with_state(state)
}

/// Spawn the API server in a background task and return its local address.
///
/// The server stops accepting connections once `shutdown` flips to `true`.
pub async fn spawn_api_server(
    config: ApiConfig,
    state: ApiState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state).layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let stopped = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        };

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(stopped)
            .await
        {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
