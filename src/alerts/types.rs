//! Alert model shared by the engine, the log and the wire frames

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::thresholds::Metric;

pub type AlertId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Active,
    Snoozed,
    Acknowledged,
    Resolved,
}

impl AlertState {
    /// Active and snoozed alerts still represent an ongoing violation.
    pub fn in_effect(&self) -> bool {
        matches!(self, AlertState::Active | AlertState::Snoozed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Active => "active",
            AlertState::Snoozed => "snoozed",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one kind of ongoing violation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertKey {
    /// Node name (or the local node in single-node mode)
    pub scope: String,
    /// GPU index, `None` for host level metrics
    pub gpu: Option<u32>,
    pub metric: Metric,
    pub severity: Severity,
}

impl AlertKey {
    pub fn new(scope: &str, gpu: Option<u32>, metric: Metric, severity: Severity) -> Self {
        Self {
            scope: scope.to_string(),
            gpu,
            metric,
            severity,
        }
    }

    /// Same scope, GPU and metric regardless of severity.
    pub fn matches(&self, scope: &str, gpu: Option<u32>, metric: Metric) -> bool {
        self.scope == scope && self.gpu == gpu && self.metric == metric
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.gpu {
            Some(gpu) => write!(
                f,
                "{} GPU {gpu} {} [{}]",
                self.scope, self.metric, self.severity
            ),
            None => write!(f, "{} {} [{}]", self.scope, self.metric, self.severity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    #[serde(flatten)]
    pub key: AlertKey,
    pub value: f64,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    pub state: AlertState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snooze_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn severity(&self) -> Severity {
        self.key.severity
    }

    pub fn needs_attention(&self) -> bool {
        self.state == AlertState::Active
    }
}
