//! Broadcast fan-out to live dashboard subscribers
//!
//! Every broadcast delivers the same serialized frame to all sessions
//! concurrently. A session whose delivery fails or exceeds the per-subscriber
//! timeout is dropped in the same pass and never retried.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Write side of one subscriber session
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn deliver(&self, frame: Arc<str>) -> anyhow::Result<()>;
}

/// Subscriber backed by a bounded channel, drained by e.g. a websocket task
///
/// A full or closed channel counts as a failed delivery.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn deliver(&self, frame: Arc<str>) -> anyhow::Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("subscriber is lagging"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("subscriber is gone"),
        })
    }
}

/// Outcome of one broadcast pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub removed: Vec<SessionId>,
}

pub struct Fanout {
    sessions: Mutex<HashMap<SessionId, Arc<dyn Subscriber>>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Fanout {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SessionId {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut sessions = self.sessions.lock().await;
        sessions.insert(id, subscriber);
        debug!("{id} subscribed ({} total)", sessions.len());
        id
    }

    pub async fn unsubscribe(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            debug!("{id} unsubscribed ({} left)", sessions.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Deliver `frame` to every session, dropping the ones that fail.
    pub async fn broadcast(&self, frame: Arc<str>) -> DeliveryReport {
        // the session lock is not held across deliveries
        let sessions = self
            .sessions
            .lock()
            .await
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.clone()))
            .collect::<Vec<_>>();

        let timeout = self.timeout;
        let deliveries = sessions.into_iter().map(|(id, subscriber)| {
            let frame = frame.clone();
            async move {
                let result = match tokio::time::timeout(timeout, subscriber.deliver(frame)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow!("delivery timed out after {timeout:?}")),
                };
                (id, result)
            }
        });

        let mut report = DeliveryReport::default();
        for (id, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!("dropping {id}: {e:#}");
                    report.removed.push(id);
                }
            }
        }

        if !report.removed.is_empty() {
            let mut sessions = self.sessions.lock().await;
            for id in &report.removed {
                sessions.remove(id);
            }
        }

        trace!("delivered frame to {} sessions", report.delivered);
        report
    }
}
