//! NodeWorker - keeps one stream connection to a remote node alive
//!
//! ## Message Flow
//!
//! ```text
//! connect ──ok──► mark Online ──► read frame ──► parse ──► store snapshot
//!    ▲                               │  ▲           │
//!    │                               │  └─ skip ◄───┘ (malformed frame)
//!    │                               ▼
//!    └── sleep(delay) ◄── mark Offline ◄── read failure / close
//! ```
//!
//! Retries are unbounded: a node may come back at any time, so the worker only
//! stops on shutdown or when its node is deregistered.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, instrument, trace, warn};

use super::connector::{FrameStream, NodeConnector};
use super::{InboundFrame, NodeId, RegistryState};
use crate::config::Config;

/// Delay between reconnect attempts
///
/// Without a cap the delay is fixed. With a cap it doubles per failed attempt
/// until the cap is reached and resets after a successful connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: None,
        }
    }

    pub fn exponential(delay: Duration, max_delay: Duration) -> Self {
        Self {
            delay,
            max_delay: Some(max_delay),
        }
    }

    /// Delay before retry number `attempt` (0 based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.max_delay {
            None => self.delay,
            Some(max_delay) => {
                let factor = 2u32.saturating_pow(attempt.min(16));
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl From<&Config> for ReconnectPolicy {
    fn from(config: &Config) -> Self {
        match config.max_reconnect_delay() {
            Some(max_delay) => Self::exponential(config.reconnect_delay(), max_delay),
            None => Self::fixed(config.reconnect_delay()),
        }
    }
}

/// How a connected read loop ended
#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Disconnected,
    Shutdown,
}

pub(crate) struct NodeWorker {
    id: NodeId,
    url: String,
    state: Arc<RwLock<RegistryState>>,
    connector: Arc<dyn NodeConnector>,
    policy: ReconnectPolicy,
    shutdown: watch::Receiver<bool>,
}

impl NodeWorker {
    pub(crate) fn new(
        id: NodeId,
        url: String,
        state: Arc<RwLock<RegistryState>>,
        connector: Arc<dyn NodeConnector>,
        policy: ReconnectPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            url,
            state,
            connector,
            policy,
            shutdown,
        }
    }

    #[instrument(skip(self), fields(node = %self.url))]
    pub(crate) async fn run(mut self) {
        debug!("starting node worker");

        let mut attempt = 0u32;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let connection = tokio::select! {
                result = self.connector.connect(&self.url) => result,
                _ = self.shutdown.changed() => break,
            };

            match connection {
                Ok(stream) => {
                    info!("connected");
                    attempt = 0;
                    self.state.write().await.mark_online(self.id);

                    let outcome = self.read_frames(stream).await;
                    self.state.write().await.mark_offline(self.id);

                    if outcome == ReadOutcome::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    self.state.write().await.mark_offline(self.id);
                    warn!("connection failed: {e:#}");
                }
            }

            let delay = self.policy.delay_for(attempt);
            attempt = attempt.saturating_add(1);
            trace!("reconnecting in {delay:?}");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        debug!("node worker stopped");
    }

    /// Read frames until the stream fails, closes or shutdown is signalled.
    async fn read_frames(&mut self, mut stream: Box<dyn FrameStream>) -> ReadOutcome {
        loop {
            let next = tokio::select! {
                next = stream.next_frame() => next,
                _ = self.shutdown.changed() => {
                    stream.close().await;
                    return ReadOutcome::Shutdown;
                }
            };

            match next {
                Ok(Some(text)) => match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(frame) => {
                        trace!("received snapshot with {} GPUs", frame.gpus.len());
                        self.state
                            .write()
                            .await
                            .apply_frame(self.id, frame, Utc::now());
                    }
                    Err(e) => warn!("skipping malformed frame: {e}"),
                },
                Ok(None) => {
                    info!("stream closed by node");
                    return ReadOutcome::Disconnected;
                }
                Err(e) => {
                    warn!("read failed: {e:#}");
                    return ReadOutcome::Disconnected;
                }
            }
        }
    }
}
