//! Request and response bodies of the control surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{Alert, AlertRecord};
use crate::registry::{NodeId, NodeStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub subscribers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub needs_attention: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoozeRequest {
    pub seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertLogResponse {
    pub records: Vec<AlertRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub url: String,
    pub display_name: String,
    pub status: NodeStatus,
    pub last_update: Option<DateTime<Utc>>,
}
