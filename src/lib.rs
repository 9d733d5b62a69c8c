pub mod alerts;
pub mod api;
pub mod broadcast;
pub mod cluster;
pub mod config;
pub mod registry;
pub mod room;
pub mod source;
pub mod thresholds;
pub mod util;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Point-in-time metrics of one host: every GPU keyed by its index plus the
/// host level counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gpus: BTreeMap<u32, GpuMetrics>,
    #[serde(default)]
    pub system: HostMetrics,
}

impl Snapshot {
    pub fn gpu_count(&self) -> usize {
        self.gpus.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuMetrics {
    pub name: Option<String>,
    /// Utilization in percent
    pub utilization: f64,
    /// Temperature in °C
    pub temperature: f64,
    /// Used memory in MiB
    pub memory_used: f64,
    /// Total memory in MiB
    pub memory_total: f64,
    /// Power draw in W
    pub power_draw: f64,
    /// Power limit in W
    pub power_limit: f64,
    /// Graphics clock in MHz
    pub clock_graphics: f64,
    /// Memory clock in MHz
    pub clock_memory: f64,
    pub fan_speed: Option<f64>,
}

impl GpuMetrics {
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used, self.memory_total)
    }

    pub fn power_percent(&self) -> f64 {
        percent(self.power_draw, self.power_limit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostMetrics {
    pub cpu_percent: f64,
    /// Used memory in bytes
    pub memory_used: f64,
    /// Total memory in bytes
    pub memory_total: f64,
    /// Used disk space in bytes
    pub disk_used: f64,
    /// Total disk space in bytes
    pub disk_total: f64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub load_average: f64,
}

impl HostMetrics {
    pub fn memory_percent(&self) -> f64 {
        percent(self.memory_used, self.memory_total)
    }

    pub fn disk_percent(&self) -> f64 {
        percent(self.disk_used, self.disk_total)
    }
}

/// `used / total * 100`, where a zero total counts as 1.
pub fn percent(used: f64, total: f64) -> f64 {
    let total = if total == 0.0 { 1.0 } else { total };
    used / total * 100.0
}
