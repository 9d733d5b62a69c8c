//! Snapshot sources for single-node rooms
//!
//! [`SystemSource`] reads host metrics through `sysinfo` and asks an optional
//! [`GpuProbe`] for the GPU map. [`StaticSource`] hands out a replaceable
//! snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use sysinfo::{Disks, Networks, System};
use tokio::sync::RwLock;
use tracing::{instrument, trace, warn};

use crate::{GpuMetrics, HostMetrics, Snapshot};

/// Anything that can produce a snapshot on demand
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn snapshot(&self) -> anyhow::Result<Snapshot>;
}

/// Supplies the per-GPU part of a snapshot
#[async_trait]
pub trait GpuProbe: Send + Sync + 'static {
    async fn probe(&self) -> anyhow::Result<BTreeMap<u32, GpuMetrics>>;
}

#[derive(Debug, Default)]
pub struct StaticSource {
    snapshot: RwLock<Snapshot>,
}

impl StaticSource {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub async fn set(&self, snapshot: Snapshot) {
        *self.snapshot.write().await = snapshot;
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        Ok(self.snapshot.read().await.clone())
    }
}

/// Host metrics of the machine this runs on
pub struct SystemSource {
    system: Arc<Mutex<System>>,
    gpu_probe: Option<Arc<dyn GpuProbe>>,
}

impl SystemSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta between two refreshes
        system.refresh_cpu_usage();

        Self {
            system: Arc::new(Mutex::new(system)),
            gpu_probe: None,
        }
    }

    pub fn with_gpu_probe(mut self, probe: impl GpuProbe) -> Self {
        self.gpu_probe = Some(Arc::new(probe));
        self
    }

    async fn host_metrics(&self) -> anyhow::Result<HostMetrics> {
        let system = self.system.clone();

        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| anyhow!("system info lock poisoned"))?;
            system.refresh_cpu_usage();
            system.refresh_memory();

            let disks = Disks::new_with_refreshed_list();
            let (disk_total, disk_available) = disks
                .list()
                .iter()
                .fold((0u64, 0u64), |(total, available), disk| {
                    (total + disk.total_space(), available + disk.available_space())
                });

            let networks = Networks::new_with_refreshed_list();
            let (net_rx_bytes, net_tx_bytes) = networks
                .list()
                .values()
                .fold((0u64, 0u64), |(rx, tx), data| {
                    (rx + data.total_received(), tx + data.total_transmitted())
                });

            Ok(HostMetrics {
                cpu_percent: system.global_cpu_usage() as f64,
                memory_used: system.used_memory() as f64,
                memory_total: system.total_memory() as f64,
                disk_used: disk_total.saturating_sub(disk_available) as f64,
                disk_total: disk_total as f64,
                net_rx_bytes,
                net_tx_bytes,
                load_average: System::load_average().one,
            })
        })
        .await
        .context("host metrics task failed")?
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSource for SystemSource {
    #[instrument(skip_all)]
    async fn snapshot(&self) -> anyhow::Result<Snapshot> {
        let system = self.host_metrics().await?;

        let gpus = match &self.gpu_probe {
            Some(probe) => probe.probe().await.unwrap_or_else(|e| {
                warn!("gpu probe failed: {e:#}");
                BTreeMap::new()
            }),
            None => BTreeMap::new(),
        };

        trace!("collected snapshot with {} GPUs", gpus.len());
        Ok(Snapshot { gpus, system })
    }
}

const NVIDIA_SMI_QUERY: &str = "--query-gpu=index,name,utilization.gpu,temperature.gpu,memory.used,memory.total,power.draw,power.limit,clocks.gr,clocks.mem,fan.speed";

/// GPU probe shelling out to `nvidia-smi`
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    binary: String,
}

impl NvidiaSmi {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

#[async_trait]
impl GpuProbe for NvidiaSmi {
    async fn probe(&self) -> anyhow::Result<BTreeMap<u32, GpuMetrics>> {
        let output = tokio::process::Command::new(&self.binary)
            .args([NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"])
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(parse_nvidia_smi(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `nvidia-smi` csv rows (no header, no units). Rows that do not parse
/// are skipped; unavailable readings (`[N/A]`) become 0.
pub fn parse_nvidia_smi(output: &str) -> BTreeMap<u32, GpuMetrics> {
    let mut gpus = BTreeMap::new();

    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let fields = line.split(',').map(str::trim).collect::<Vec<_>>();
        if fields.len() < 11 {
            warn!("skipping short nvidia-smi row: {line}");
            continue;
        }

        let Ok(index) = fields[0].parse::<u32>() else {
            warn!("skipping nvidia-smi row without index: {line}");
            continue;
        };

        let reading = |field: &str| field.parse::<f64>().ok();

        gpus.insert(
            index,
            GpuMetrics {
                name: Some(fields[1].to_string()).filter(|name| !name.is_empty()),
                utilization: reading(fields[2]).unwrap_or_default(),
                temperature: reading(fields[3]).unwrap_or_default(),
                memory_used: reading(fields[4]).unwrap_or_default(),
                memory_total: reading(fields[5]).unwrap_or_default(),
                power_draw: reading(fields[6]).unwrap_or_default(),
                power_limit: reading(fields[7]).unwrap_or_default(),
                clock_graphics: reading(fields[8]).unwrap_or_default(),
                clock_memory: reading(fields[9]).unwrap_or_default(),
                fan_speed: reading(fields[10]),
            },
        );
    }

    gpus
}
