//! Cluster aggregator and the views handed to the alert engine and subscribers
//!
//! A [`ClusterSnapshot`] is built fresh on every read from the registry; there
//! is no cache to invalidate. Single-node deployments skip the registry and
//! wrap their local snapshot in [`View::Single`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::Snapshot;
use crate::registry::{NodeEntry, NodeRegistry, NodeStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub url: String,
    pub status: NodeStatus,
    pub snapshot: Option<Snapshot>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Merged view over all registered nodes, keyed by display name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSnapshot {
    pub nodes: BTreeMap<String, NodeView>,
    pub online_count: usize,
    pub total_count: usize,
    /// GPUs reported by online nodes
    pub total_gpu_count: usize,
}

impl ClusterSnapshot {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeEntry>) -> Self {
        let mut cluster = Self::default();

        for node in nodes {
            cluster.total_count += 1;

            if node.is_online() {
                cluster.online_count += 1;
                cluster.total_gpu_count += node.snapshot.as_ref().map_or(0, Snapshot::gpu_count);
            }

            // two nodes may report the same name, the url tells them apart
            let name = if cluster.nodes.contains_key(&node.display_name) {
                format!("{} ({})", node.display_name, node.url)
            } else {
                node.display_name.clone()
            };

            cluster.nodes.insert(
                name,
                NodeView {
                    url: node.url.clone(),
                    status: node.status,
                    snapshot: node.snapshot.clone(),
                    last_update: node.last_update,
                },
            );
        }

        cluster
    }

    pub fn online(&self) -> impl Iterator<Item = (&str, &Snapshot)> {
        self.nodes.iter().filter_map(|(name, node)| {
            match (node.status, node.snapshot.as_ref()) {
                (NodeStatus::Online, Some(snapshot)) => Some((name.as_str(), snapshot)),
                _ => None,
            }
        })
    }
}

/// Read-locks the registry and merges every node into a fresh snapshot.
pub async fn build_view(registry: &NodeRegistry) -> ClusterSnapshot {
    let state = registry.read().await;
    ClusterSnapshot::from_nodes(state.nodes())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalView {
    pub node_name: String,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

/// What one tick observes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum View {
    Single(LocalView),
    Cluster(ClusterSnapshot),
}

impl View {
    pub fn single(node_name: impl Into<String>, snapshot: Snapshot) -> Self {
        View::Single(LocalView {
            node_name: node_name.into(),
            snapshot,
        })
    }

    /// `(scope, snapshot)` pairs to evaluate; offline nodes are skipped.
    pub fn scopes(&self) -> Vec<(&str, &Snapshot)> {
        match self {
            View::Single(local) => vec![(local.node_name.as_str(), &local.snapshot)],
            View::Cluster(cluster) => cluster.online().collect(),
        }
    }
}
