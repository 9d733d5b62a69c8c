//! Node registry - one live stream connection per remote node
//!
//! Each registered URL gets a dedicated [`worker::NodeWorker`] that keeps
//! reconnecting for as long as the registry runs. The registry state lives
//! behind its own lock, independent of the alert engine and the subscriber
//! set.
//!
//! A node's identity is its URL (and the internal [`NodeId`]). The display
//! name starts as the URL and follows the name the node reports in its frames.

pub mod connector;
pub mod worker;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{GpuMetrics, HostMetrics, Snapshot};

pub use connector::{FrameStream, NodeConnector, WsConnector};
pub use worker::ReconnectPolicy;

use worker::NodeWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

/// Snapshot frame as sent by a node; fields beyond these are ignored
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Name the node reports for itself
    #[serde(default)]
    pub node_name: Option<String>,

    #[serde(default)]
    pub gpus: BTreeMap<u32, GpuMetrics>,

    #[serde(default)]
    pub system: HostMetrics,
}

impl InboundFrame {
    pub fn into_parts(self) -> (Option<String>, Snapshot) {
        let snapshot = Snapshot {
            gpus: self.gpus,
            system: self.system,
        };
        (self.node_name, snapshot)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub url: String,
    pub display_name: String,
    pub status: NodeStatus,
    pub snapshot: Option<Snapshot>,
    pub last_update: Option<DateTime<Utc>>,
}

impl NodeEntry {
    fn new(id: NodeId, url: &str) -> Self {
        Self {
            id,
            url: url.to_string(),
            display_name: url.to_string(),
            status: NodeStatus::Offline,
            snapshot: None,
            last_update: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == NodeStatus::Online
    }
}

/// Registry contents guarded by the registry lock
#[derive(Debug, Default)]
pub struct RegistryState {
    nodes: BTreeMap<NodeId, NodeEntry>,
    next_id: u64,
}

impl RegistryState {
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn find_url(&self, url: &str) -> Option<NodeId> {
        self.nodes
            .values()
            .find(|node| node.url == url)
            .map(|node| node.id)
    }

    fn insert(&mut self, url: &str) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, NodeEntry::new(id, url));
        id
    }

    fn mark_online(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id)
            && node.status != NodeStatus::Online
        {
            info!("{}: online", node.display_name);
            node.status = NodeStatus::Online;
        }
    }

    fn mark_offline(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&id)
            && node.status != NodeStatus::Offline
        {
            warn!("{}: offline", node.display_name);
            node.status = NodeStatus::Offline;
        }
    }

    fn apply_frame(&mut self, id: NodeId, frame: InboundFrame, now: DateTime<Utc>) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };

        let (node_name, snapshot) = frame.into_parts();

        if let Some(name) = node_name.filter(|name| !name.is_empty())
            && name != node.display_name
        {
            debug!("{}: now known as {name}", node.display_name);
            node.display_name = name;
        }

        node.snapshot = Some(snapshot);
        node.last_update = Some(now);
    }
}

#[derive(Clone)]
pub struct NodeRegistry {
    state: Arc<RwLock<RegistryState>>,
    workers: Arc<Mutex<HashMap<NodeId, JoinHandle<()>>>>,
    connector: Arc<dyn NodeConnector>,
    policy: ReconnectPolicy,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn NodeConnector>, policy: ReconnectPolicy) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            workers: Arc::new(Mutex::new(HashMap::new())),
            connector,
            policy,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Registry connecting over websockets
    pub fn websocket(policy: ReconnectPolicy) -> Self {
        Self::new(Arc::new(WsConnector::default()), policy)
    }

    /// Add a node (Offline, no snapshot) and start its worker.
    ///
    /// Registering a URL twice returns the existing id.
    pub async fn register(&self, url: &str) -> NodeId {
        // held until the handle is stored so a racing deregister finds it
        let mut workers = self.workers.lock().await;

        let id = {
            let mut state = self.state.write().await;
            if let Some(id) = state.find_url(url) {
                debug!("{url} already registered as {id}");
                return id;
            }
            state.insert(url)
        };

        let worker = NodeWorker::new(
            id,
            url.to_string(),
            self.state.clone(),
            self.connector.clone(),
            self.policy,
            self.shutdown_tx.subscribe(),
        );

        workers.insert(id, tokio::spawn(worker.run()));

        info!("registered {url} as {id}");
        id
    }

    /// Remove a node and stop its worker, closing its connection.
    pub async fn deregister(&self, url: &str) -> bool {
        let id = {
            let mut state = self.state.write().await;
            let Some(id) = state.find_url(url) else {
                return false;
            };
            state.nodes.remove(&id);
            id
        };

        if let Some(handle) = self.workers.lock().await.remove(&id) {
            handle.abort();
        }

        info!("deregistered {url}");
        true
    }

    /// Read access for building views
    pub async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    pub async fn nodes(&self) -> Vec<NodeEntry> {
        self.state.read().await.nodes().cloned().collect()
    }

    pub async fn get(&self, id: NodeId) -> Option<NodeEntry> {
        self.state.read().await.nodes.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.is_empty()
    }

    /// Signal all workers to stop and wait up to `grace` for them.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown_tx.send_replace(true);

        let handles = self
            .workers
            .lock()
            .await
            .drain()
            .map(|(_, handle)| handle)
            .collect::<Vec<_>>();

        debug!("waiting for {} node workers", handles.len());

        for mut handle in handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("node worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}
