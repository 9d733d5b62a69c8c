//! Alert engine - threshold evaluation and alert lifecycle
//!
//! The engine is driven by the room's periodic tick and is never evaluated
//! concurrently with itself, so every transition of a given key is linear.
//!
//! ## Lifecycle
//!
//! ```text
//!             snooze             now >= snooze_until
//!   Active ──────────► Snoozed ─────────────────────► Active
//!     │                   │
//!     │ acknowledge       │ acknowledge
//!     ▼                   ▼
//!   Acknowledged ◄────────┘      (expires createdAt + 1min)
//!
//!   Active/Snoozed ── value < warning ──► Resolved (expires resolvedAt + 30s)
//! ```
//!
//! At most one active or snoozed alert exists per [`AlertKey`]. A key that
//! triggered within the cooldown window does not create another alert.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, trace, warn};

use super::log::AlertLog;
use super::types::{Alert, AlertId, AlertKey, AlertState, Severity};
use crate::cluster::View;
use crate::config::{AlertConfig, MAX_SECS};
use crate::thresholds::{Metric, Threshold, ThresholdConfig};
use crate::{GpuMetrics, HostMetrics, Snapshot};

/// Timing and capacity knobs of the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub cooldown: Duration,
    pub resolved_ttl: Duration,
    pub acknowledged_ttl: Duration,
    pub active_ttl: Duration,
    pub max_history: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for EngineSettings {
    fn from(config: &AlertConfig) -> Self {
        Self {
            cooldown: seconds(config.cooldown_secs),
            resolved_ttl: seconds(config.resolved_ttl_secs),
            acknowledged_ttl: seconds(config.acknowledged_ttl_secs),
            active_ttl: seconds(config.active_ttl_secs),
            max_history: config.max_history.max(1),
        }
    }
}

/// Saturates at the largest value the engine clock can hold
fn seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_SECS) as i64)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlertActionError {
    #[error("alert {0} not found")]
    NotFound(AlertId),

    #[error("alert {id} is {state}")]
    InvalidState { id: AlertId, state: AlertState },
}

/// Severity a value falls into, `None` below the warning level.
pub fn classify(value: f64, threshold: Threshold) -> Option<Severity> {
    if value >= threshold.critical {
        Some(Severity::Critical)
    } else if value >= threshold.warning {
        Some(Severity::Warning)
    } else {
        None
    }
}

fn gpu_value(gpu: &GpuMetrics, metric: Metric) -> Option<f64> {
    match metric {
        Metric::Temperature => Some(gpu.temperature),
        Metric::Utilization => Some(gpu.utilization),
        Metric::Memory => Some(gpu.memory_percent()),
        Metric::Power => Some(gpu.power_percent()),
        _ => None,
    }
}

fn host_value(host: &HostMetrics, metric: Metric) -> Option<f64> {
    match metric {
        Metric::Cpu => Some(host.cpu_percent),
        Metric::HostMemory => Some(host.memory_percent()),
        Metric::Disk => Some(host.disk_percent()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct AlertEngine {
    settings: EngineSettings,
    thresholds: ThresholdConfig,

    /// Alert history, oldest first
    history: VecDeque<Alert>,

    /// Last creation time per key (cooldown bookkeeping)
    last_triggered: HashMap<AlertKey, DateTime<Utc>>,

    next_id: AlertId,
    log: Option<AlertLog>,
}

impl AlertEngine {
    /// Create an engine; `thresholds` must already be validated.
    pub fn new(thresholds: ThresholdConfig, settings: EngineSettings) -> Self {
        Self {
            settings,
            thresholds,
            history: VecDeque::with_capacity(settings.max_history),
            last_triggered: HashMap::new(),
            next_id: 1,
            log: None,
        }
    }

    pub fn from_config(thresholds: ThresholdConfig, config: &AlertConfig) -> Self {
        let engine = Self::new(thresholds, EngineSettings::from(config));
        match &config.log_path {
            Some(path) => engine.with_log(AlertLog::new(path)),
            None => engine,
        }
    }

    pub fn with_log(mut self, log: AlertLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn log(&self) -> Option<&AlertLog> {
        self.log.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Swap the threshold configuration; takes effect on the next evaluation.
    pub fn set_thresholds(&mut self, thresholds: ThresholdConfig) {
        debug!("reloading {} thresholds", thresholds.len());
        self.thresholds = thresholds;
    }

    /// One tick over a view: wake expired snoozes, evaluate every scope,
    /// collect expired alerts. Returns the alerts created in this pass.
    #[instrument(skip_all)]
    pub fn evaluate(&mut self, view: &View, now: DateTime<Utc>) -> Vec<Alert> {
        self.evaluate_scopes(view.scopes(), now)
    }

    pub fn evaluate_scopes<'a>(
        &mut self,
        scopes: impl IntoIterator<Item = (&'a str, &'a Snapshot)>,
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        self.wake_snoozed(now);

        let mut created = vec![];
        for (scope, snapshot) in scopes {
            self.evaluate_snapshot(scope, snapshot, now, &mut created);
        }

        self.collect_garbage(now);
        created
    }

    fn evaluate_snapshot(
        &mut self,
        scope: &str,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
        created: &mut Vec<Alert>,
    ) {
        for (&index, gpu) in &snapshot.gpus {
            for metric in Metric::GPU {
                let (Some(threshold), Some(value)) =
                    (self.thresholds.get(metric), gpu_value(gpu, metric))
                else {
                    continue;
                };
                self.check(scope, Some(index), metric, value, threshold, now, created);
            }
        }

        for metric in Metric::HOST {
            let (Some(threshold), Some(value)) =
                (self.thresholds.get(metric), host_value(&snapshot.system, metric))
            else {
                continue;
            };
            self.check(scope, None, metric, value, threshold, now, created);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check(
        &mut self,
        scope: &str,
        gpu: Option<u32>,
        metric: Metric,
        value: f64,
        threshold: Threshold,
        now: DateTime<Utc>,
        created: &mut Vec<Alert>,
    ) {
        let Some(severity) = classify(value, threshold) else {
            self.resolve(scope, gpu, metric, now);
            return;
        };

        let key = AlertKey::new(scope, gpu, metric, severity);

        if self.in_effect(&key) {
            trace!("{key}: violation ongoing ({value:.1})");
            return;
        }

        if let Some(last) = self.last_triggered.get(&key)
            && now - *last < self.settings.cooldown
        {
            trace!("{key}: in cooldown since {last}");
            return;
        }

        let limit = match severity {
            Severity::Critical => threshold.critical,
            Severity::Warning => threshold.warning,
        };

        let alert = Alert {
            id: self.next_id,
            key: key.clone(),
            value,
            threshold: limit,
            created_at: now,
            state: AlertState::Active,
            snooze_until: None,
            resolved_at: None,
        };
        self.next_id += 1;

        info!("{key}: {value:.1} crossed {limit:.1}");

        if let Some(log) = &self.log
            && let Err(e) = log.append(&alert)
        {
            warn!("failed to persist alert {}: {e}", alert.id);
        }

        self.last_triggered.insert(key, now);
        self.push(alert.clone());
        created.push(alert);
    }

    fn in_effect(&self, key: &AlertKey) -> bool {
        self.history
            .iter()
            .any(|alert| alert.key == *key && alert.state.in_effect())
    }

    /// Resolve every active or snoozed alert of `(scope, gpu, metric, *)`.
    fn resolve(&mut self, scope: &str, gpu: Option<u32>, metric: Metric, now: DateTime<Utc>) {
        for alert in self
            .history
            .iter_mut()
            .filter(|alert| alert.state.in_effect() && alert.key.matches(scope, gpu, metric))
        {
            debug!("{}: resolved", alert.key);
            alert.state = AlertState::Resolved;
            alert.snooze_until = None;
            alert.resolved_at = Some(now);
        }
    }

    fn push(&mut self, alert: Alert) {
        while self.history.len() >= self.settings.max_history {
            if let Some(evicted) = self.history.pop_front() {
                trace!("history full, evicting alert {}", evicted.id);
            }
        }
        self.history.push_back(alert);
    }

    fn wake_snoozed(&mut self, now: DateTime<Utc>) {
        for alert in self.history.iter_mut() {
            if alert.state == AlertState::Snoozed
                && alert.snooze_until.is_some_and(|until| now >= until)
            {
                debug!("{}: snooze expired", alert.key);
                alert.state = AlertState::Active;
                alert.snooze_until = None;
            }
        }
    }

    /// Drop alerts whose time-to-live elapsed.
    pub fn collect_garbage(&mut self, now: DateTime<Utc>) {
        let EngineSettings {
            resolved_ttl,
            acknowledged_ttl,
            active_ttl,
            cooldown,
            ..
        } = self.settings;

        let before = self.history.len();
        self.history.retain(|alert| match alert.state {
            AlertState::Resolved => alert
                .resolved_at
                .is_none_or(|resolved_at| now - resolved_at <= resolved_ttl),
            AlertState::Acknowledged => now - alert.created_at <= acknowledged_ttl,
            AlertState::Active | AlertState::Snoozed => now - alert.created_at <= active_ttl,
        });

        let removed = before - self.history.len();
        if removed > 0 {
            trace!("expired {removed} alerts");
        }

        self.last_triggered.retain(|_, last| now - *last < cooldown);
    }

    pub fn snooze(
        &mut self,
        id: AlertId,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Alert, AlertActionError> {
        let alert = self.get_mut(id)?;
        if alert.state != AlertState::Active {
            return Err(AlertActionError::InvalidState {
                id,
                state: alert.state,
            });
        }

        alert.state = AlertState::Snoozed;
        alert.snooze_until = Some(now + duration);
        debug!("{}: snoozed until {}", alert.key, now + duration);
        Ok(alert.clone())
    }

    pub fn acknowledge(&mut self, id: AlertId) -> Result<Alert, AlertActionError> {
        let alert = self.get_mut(id)?;
        if !alert.state.in_effect() {
            return Err(AlertActionError::InvalidState {
                id,
                state: alert.state,
            });
        }

        alert.state = AlertState::Acknowledged;
        alert.snooze_until = None;
        debug!("{}: acknowledged", alert.key);
        Ok(alert.clone())
    }

    fn get_mut(&mut self, id: AlertId) -> Result<&mut Alert, AlertActionError> {
        self.history
            .iter_mut()
            .find(|alert| alert.id == id)
            .ok_or(AlertActionError::NotFound(id))
    }

    pub fn get(&self, id: AlertId) -> Option<&Alert> {
        self.history.iter().find(|alert| alert.id == id)
    }

    /// Current history, oldest first
    pub fn alerts(&self) -> Vec<Alert> {
        self.history.iter().cloned().collect()
    }

    /// Number of alerts that are active (not snoozed, acknowledged or resolved)
    pub fn needs_attention(&self) -> usize {
        self.history
            .iter()
            .filter(|alert| alert.needs_attention())
            .count()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}
