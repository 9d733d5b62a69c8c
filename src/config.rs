use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, ensure};
use tracing::{debug, trace};

use crate::thresholds::ThresholdConfig;

/// Largest duration in seconds the engine clock can represent
pub const MAX_SECS: u64 = (i64::MAX / 1000) as u64;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Name reported for the local node (single-node mode)
    pub node_name: Option<String>,

    /// Address the control surface and the stream endpoint bind to
    pub bind: Option<SocketAddr>,

    /// Tick interval of the room driver in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Stream URLs of remote nodes (hub mode)
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Enables capped exponential backoff when set
    pub max_reconnect_delay_secs: Option<u64>,

    /// Maximum time a single subscriber delivery may take
    #[serde(default = "default_subscriber_timeout_ms")]
    pub subscriber_timeout_ms: u64,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// `nvidia-smi` binary used to probe GPUs, `null` disables probing
    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: Option<String>,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Threshold file, overrides `thresholds` and receives live updates
    pub thresholds_path: Option<PathBuf>,

    #[serde(default)]
    pub alerts: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: None,
            bind: None,
            tick_interval_ms: default_tick_interval_ms(),
            nodes: vec![],
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_delay_secs: None,
            subscriber_timeout_ms: default_subscriber_timeout_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            nvidia_smi: default_nvidia_smi(),
            thresholds: ThresholdConfig::default(),
            thresholds_path: None,
            alerts: AlertConfig::default(),
        }
    }
}

impl Config {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn max_reconnect_delay(&self) -> Option<Duration> {
        self.max_reconnect_delay_secs.map(Duration::from_secs)
    }

    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.tick_interval_ms > 0, "tick_interval_ms must be positive");
        ensure!(
            self.subscriber_timeout_ms > 0,
            "subscriber_timeout_ms must be positive"
        );

        let seconds = [
            ("reconnect_delay_secs", Some(self.reconnect_delay_secs)),
            ("max_reconnect_delay_secs", self.max_reconnect_delay_secs),
            ("shutdown_grace_secs", Some(self.shutdown_grace_secs)),
            ("alerts.cooldown_secs", Some(self.alerts.cooldown_secs)),
            ("alerts.resolved_ttl_secs", Some(self.alerts.resolved_ttl_secs)),
            ("alerts.acknowledged_ttl_secs", Some(self.alerts.acknowledged_ttl_secs)),
            ("alerts.active_ttl_secs", Some(self.alerts.active_ttl_secs)),
        ];
        for (name, value) in seconds {
            if let Some(value) = value {
                ensure!(value <= MAX_SECS, "{name} must be at most {MAX_SECS}, got {value}");
            }
        }

        Ok(())
    }

    /// Thresholds from `thresholds_path` if configured, the inline ones otherwise.
    pub fn resolve_thresholds(&self) -> anyhow::Result<ThresholdConfig> {
        match &self.thresholds_path {
            Some(path) if path.exists() => ThresholdConfig::load(path)
                .with_context(|| format!("failed to load thresholds from {}", path.display())),
            _ => {
                self.thresholds
                    .validate()
                    .context("invalid inline thresholds")?;
                Ok(self.thresholds.clone())
            }
        }
    }
}

/// Alert engine tuning
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AlertConfig {
    /// Minimum spacing between two alerts of the same key
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_resolved_ttl_secs")]
    pub resolved_ttl_secs: u64,

    #[serde(default = "default_acknowledged_ttl_secs")]
    pub acknowledged_ttl_secs: u64,

    /// Hard cutoff for alerts that stay active or snoozed
    #[serde(default = "default_active_ttl_secs")]
    pub active_ttl_secs: u64,

    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Append-only alert log (one JSON line per new alert)
    pub log_path: Option<PathBuf>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            resolved_ttl_secs: default_resolved_ttl_secs(),
            acknowledged_ttl_secs: default_acknowledged_ttl_secs(),
            active_ttl_secs: default_active_ttl_secs(),
            max_history: default_max_history(),
            log_path: None,
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_subscriber_timeout_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    3
}

fn default_nvidia_smi() -> Option<String> {
    Some(String::from("nvidia-smi"))
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_resolved_ttl_secs() -> u64 {
    30
}

fn default_acknowledged_ttl_secs() -> u64 {
    60
}

fn default_active_ttl_secs() -> u64 {
    60 * 60
}

fn default_max_history() -> usize {
    100
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {path}"))?;

    trace!("loaded config: {config:?}");
    Ok(config)
}

/// Config from `path`, or the defaults when no file was given.
pub fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    match path {
        Some(path) => read_config_file(path),
        None => {
            debug!("no config file given, using defaults");
            Ok(Config::default())
        }
    }
}
