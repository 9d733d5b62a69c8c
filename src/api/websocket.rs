//! WebSocket handler streaming room frames to dashboards

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tracing::{debug, info};

use crate::api::state::ApiState;
use crate::broadcast::ChannelSubscriber;

/// Frames buffered per session before it counts as lagging
const SESSION_BUFFER: usize = 16;

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (subscriber, mut frames) = ChannelSubscriber::channel(SESSION_BUFFER);
    let session = state.room.subscribe(Arc::new(subscriber)).await;
    info!("{session} connected");

    let (mut sender, mut receiver) = socket.split();

    // ends once the room drops the session or the client goes away
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if sender.send(Message::Text(frame.to_string())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    state.room.unsubscribe(session).await;
    info!("{session} disconnected");
}
