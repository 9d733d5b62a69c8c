//! Threshold configuration
//!
//! Thresholds map a metric name to a `(warning, critical)` pair. They are
//! validated here, at the boundary, so the alert engine can rely on
//! `warning < critical` for every configured metric.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Metrics the alert engine knows how to extract from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Temperature,
    Utilization,
    Memory,
    Power,
    Cpu,
    HostMemory,
    Disk,
}

impl Metric {
    pub const GPU: [Metric; 4] = [
        Metric::Temperature,
        Metric::Utilization,
        Metric::Memory,
        Metric::Power,
    ];

    pub const HOST: [Metric; 3] = [Metric::Cpu, Metric::HostMemory, Metric::Disk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Utilization => "utilization",
            Metric::Memory => "memory",
            Metric::Power => "power",
            Metric::Cpu => "cpu",
            Metric::HostMemory => "host_memory",
            Metric::Disk => "disk",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::GPU
            .iter()
            .chain(Metric::HOST.iter())
            .find(|metric| metric.as_str() == s)
            .copied()
            .ok_or_else(|| ThresholdError::UnknownMetric(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

impl Threshold {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Mapping from metric name to its threshold pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig(BTreeMap<String, Threshold>);

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self::from_iter([
            (Metric::Temperature, Threshold::new(75.0, 85.0)),
            (Metric::Utilization, Threshold::new(90.0, 98.0)),
            (Metric::Memory, Threshold::new(85.0, 95.0)),
            (Metric::Power, Threshold::new(90.0, 98.0)),
            (Metric::Cpu, Threshold::new(85.0, 95.0)),
            (Metric::HostMemory, Threshold::new(85.0, 95.0)),
            (Metric::Disk, Threshold::new(85.0, 95.0)),
        ])
    }
}

impl FromIterator<(Metric, Threshold)> for ThresholdConfig {
    fn from_iter<I: IntoIterator<Item = (Metric, Threshold)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(metric, threshold)| (metric.as_str().to_string(), threshold))
                .collect(),
        )
    }
}

impl ThresholdConfig {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, metric: Metric) -> Option<Threshold> {
        self.0.get(metric.as_str()).copied()
    }

    pub fn set(&mut self, metric: Metric, threshold: Threshold) {
        self.0.insert(metric.as_str().to_string(), threshold);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject unknown metric names and pairs where `warning >= critical`.
    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (name, threshold) in &self.0 {
            name.parse::<Metric>()?;

            let Threshold { warning, critical } = *threshold;
            if !warning.is_finite() || !critical.is_finite() || warning >= critical {
                return Err(ThresholdError::InvalidOrdering {
                    metric: name.clone(),
                    warning,
                    critical,
                });
            }
        }
        Ok(())
    }

    /// Parse and validate thresholds from a JSON document.
    pub fn from_json(content: &str) -> Result<Self, ThresholdError> {
        let config: ThresholdConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ThresholdError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content).inspect(|config| {
            debug!("loaded {} thresholds from {}", config.len(), path.display());
            trace!("thresholds: {config:?}");
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ThresholdError> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("saved {} thresholds to {}", self.len(), path.display());
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    #[error("unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("threshold for `{metric}` must have warning < critical (got {warning} / {critical})")]
    InvalidOrdering {
        metric: String,
        warning: f64,
        critical: f64,
    },

    #[error("invalid threshold document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
