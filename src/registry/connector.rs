//! Stream connections to remote nodes
//!
//! The node worker only needs "open a stream" and "read the next frame".
//! [`WsConnector`] provides both over a websocket; tests plug in scripted
//! connectors.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::trace;

/// Opens stream connections to node URLs
#[async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn FrameStream>>;
}

/// An open connection yielding text frames in arrival order
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, `Ok(None)` once the remote closed the stream.
    async fn next_frame(&mut self) -> anyhow::Result<Option<String>>;

    /// Close the connection; dropping the stream closes it as well.
    async fn close(&mut self) {}
}

/// Websocket connector (`ws://` and `wss://`)
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl NodeConnector for WsConnector {
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn FrameStream>> {
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .with_context(|| format!("timed out connecting to {url}"))?
            .with_context(|| format!("failed to connect to {url}"))?;

        Ok(Box::new(WsFrameStream { inner: stream }))
    }
}

struct WsFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> anyhow::Result<Option<String>> {
        while let Some(message) = self.inner.next().await {
            match message.context("websocket read failed")? {
                Message::Text(text) => return Ok(Some(text)),
                // undecodable bytes are handed on and rejected as a malformed frame
                Message::Binary(bytes) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Message::Close(_) => return Ok(None),
                other => trace!("ignoring control message {other:?}"),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
        let _ = self.inner.flush().await;
    }
}
