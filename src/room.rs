//! Room - one periodic driver with its subscriber set and alert engine
//!
//! ## Tick Flow
//!
//! ```text
//! interval ──► current view ──► engine.evaluate ──► frame ──► fan-out
//!              (local source       (alert lock)      (json)    (only with
//!               or registry)                                    subscribers)
//! ```
//!
//! The driver is armed by the first subscription and keeps ticking until
//! shutdown, also while nobody is subscribed. Registry, alert engine and
//! subscriber set each sit behind their own lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, trace, warn};

use crate::alerts::{Alert, AlertActionError, AlertEngine, AlertId, AlertLog};
use crate::broadcast::{Fanout, SessionId, Subscriber};
use crate::cluster::{View, build_view};
use crate::config::Config;
use crate::registry::NodeRegistry;
use crate::source::SnapshotSource;
use crate::thresholds::ThresholdConfig;

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Where a room gets its view from on every tick
pub enum ViewSource {
    Local {
        node_name: String,
        source: Arc<dyn SnapshotSource>,
    },
    Cluster(NodeRegistry),
}

impl ViewSource {
    pub async fn current_view(&self) -> anyhow::Result<View> {
        match self {
            ViewSource::Local { node_name, source } => {
                let snapshot = source
                    .snapshot()
                    .await
                    .context("failed to read local snapshot")?;
                Ok(View::single(node_name.clone(), snapshot))
            }
            ViewSource::Cluster(registry) => Ok(View::Cluster(build_view(registry).await)),
        }
    }
}

/// Frame pushed to every subscriber
#[derive(Debug, Serialize)]
pub struct Frame<'a> {
    #[serde(flatten)]
    pub view: &'a View,
    pub timestamp: DateTime<Utc>,
    pub alerts: &'a [Alert],
    pub needs_attention: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    pub tick_interval: Duration,
    pub subscriber_timeout: Duration,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            subscriber_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for RoomSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            subscriber_timeout: config.subscriber_timeout(),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub created: Vec<Alert>,
    pub delivered: usize,
    pub removed: usize,
}

struct RoomInner {
    source: ViewSource,
    fanout: Fanout,
    engine: Mutex<AlertEngine>,
    tick_interval: Duration,
    armed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

impl Room {
    pub fn new(source: ViewSource, engine: AlertEngine, settings: RoomSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(RoomInner {
                source,
                fanout: Fanout::new(settings.subscriber_timeout),
                engine: Mutex::new(engine),
                tick_interval: settings.tick_interval,
                armed: AtomicBool::new(false),
                driver: Mutex::new(None),
                shutdown_tx,
            }),
        }
    }

    /// Single-node room over a local snapshot source
    pub fn local(
        node_name: impl Into<String>,
        source: Arc<dyn SnapshotSource>,
        engine: AlertEngine,
        settings: RoomSettings,
    ) -> Self {
        let source = ViewSource::Local {
            node_name: node_name.into(),
            source,
        };
        Self::new(source, engine, settings)
    }

    /// Hub room over all nodes of a registry
    pub fn cluster(registry: NodeRegistry, engine: AlertEngine, settings: RoomSettings) -> Self {
        Self::new(ViewSource::Cluster(registry), engine, settings)
    }

    pub fn registry(&self) -> Option<&NodeRegistry> {
        match &self.inner.source {
            ViewSource::Cluster(registry) => Some(registry),
            ViewSource::Local { .. } => None,
        }
    }

    pub async fn current_view(&self) -> anyhow::Result<View> {
        self.inner.source.current_view().await
    }

    /// Add a subscriber; the first one arms the driver.
    pub async fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SessionId {
        let id = self.inner.fanout.subscribe(subscriber).await;
        self.arm().await;
        id
    }

    pub async fn unsubscribe(&self, id: SessionId) -> bool {
        self.inner.fanout.unsubscribe(id).await
    }

    pub async fn subscribers(&self) -> usize {
        self.inner.fanout.len().await
    }

    pub fn is_armed(&self) -> bool {
        self.inner.armed.load(Ordering::SeqCst)
    }

    /// Start the periodic driver unless it already runs or the room shut down.
    pub async fn arm(&self) {
        if *self.inner.shutdown_tx.borrow() {
            debug!("room is shut down, not arming");
            return;
        }

        if self.inner.armed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("arming room driver ({:?} ticks)", self.inner.tick_interval);
        let shutdown = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(self.clone().drive(shutdown));
        *self.inner.driver.lock().await = Some(handle);
    }

    #[instrument(skip_all)]
    async fn drive(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.tick_interval.max(MIN_TICK_INTERVAL);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.tick(Utc::now()).await {
                warn!("tick failed: {e:#}");
            }
        }

        debug!("room driver stopped");
    }

    /// Evaluate alerts over the current view and push a frame to all
    /// subscribers.
    pub async fn tick(&self, now: DateTime<Utc>) -> anyhow::Result<TickReport> {
        let view = self.inner.source.current_view().await?;

        let (created, alerts, needs_attention) = {
            let mut engine = self.inner.engine.lock().await;
            let created = engine.evaluate(&view, now);
            (created, engine.alerts(), engine.needs_attention())
        };

        let mut report = TickReport {
            created,
            ..TickReport::default()
        };

        if self.inner.fanout.is_empty().await {
            trace!("no subscribers, skipping broadcast");
            return Ok(report);
        }

        let frame = Frame {
            view: &view,
            timestamp: now,
            alerts: &alerts,
            needs_attention,
        };
        let text = serde_json::to_string(&frame).context("failed to serialize frame")?;

        let delivery = self.inner.fanout.broadcast(Arc::from(text)).await;
        report.delivered = delivery.delivered;
        report.removed = delivery.removed.len();

        Ok(report)
    }

    pub async fn snooze(
        &self,
        id: AlertId,
        duration: chrono::Duration,
    ) -> Result<Alert, AlertActionError> {
        self.inner
            .engine
            .lock()
            .await
            .snooze(id, duration, Utc::now())
    }

    pub async fn acknowledge(&self, id: AlertId) -> Result<Alert, AlertActionError> {
        self.inner.engine.lock().await.acknowledge(id)
    }

    /// Current alert history and the number of alerts needing attention
    pub async fn alerts(&self) -> (Vec<Alert>, usize) {
        let engine = self.inner.engine.lock().await;
        (engine.alerts(), engine.needs_attention())
    }

    pub async fn thresholds(&self) -> ThresholdConfig {
        self.inner.engine.lock().await.thresholds().clone()
    }

    /// Swap thresholds; `thresholds` must already be validated.
    pub async fn set_thresholds(&self, thresholds: ThresholdConfig) {
        self.inner.engine.lock().await.set_thresholds(thresholds);
    }

    pub async fn alert_log(&self) -> Option<AlertLog> {
        self.inner.engine.lock().await.log().cloned()
    }

    /// Stop the driver, letting a running tick finish within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown_tx.send_replace(true);

        let Some(mut handle) = self.inner.driver.lock().await.take() else {
            return;
        };

        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            warn!("room driver did not stop within {grace:?}, aborting");
            handle.abort();
        }
    }
}
