pub mod cpu;
pub mod memory;
pub mod disk;
pub mod network;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use crate::config::SamplerConfig;
use crate::types::Sample;

/// Source of whole-host snapshots.
///
/// The sampler calls this once per tick and persists whatever comes back.
/// An error means the tick produced nothing worth storing.
#[async_trait]
pub trait SnapshotSource: Send {
    /// Human-readable name for this source (e.g., "procfs")
    fn name(&self) -> &str;

    /// Capture one snapshot. The returned sample has no id yet.
    async fn snapshot(&mut self) -> Result<Sample>;
}

/// Reads CPU, memory, disk and network usage from procfs and statvfs
pub struct HostCollector {
    cpu: cpu::CpuCollector,
    memory: memory::MemoryCollector,
    disk: disk::DiskCollector,
    network: network::NetworkCollector,
}

impl HostCollector {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            cpu: cpu::CpuCollector::new(&config.proc_root),
            memory: memory::MemoryCollector::new(&config.proc_root),
            disk: disk::DiskCollector::new(config),
            network: network::NetworkCollector::new(&config.proc_root, &config.exclude_interfaces),
        }
    }
}

#[async_trait]
impl SnapshotSource for HostCollector {
    fn name(&self) -> &str {
        "procfs"
    }

    async fn snapshot(&mut self) -> Result<Sample> {
        let timestamp = Utc::now();

        // CPU and memory feed the windowed averages; a guessed value would
        // skew them, so their failure fails the whole snapshot.
        let cpu_percent = self.cpu.collect().await?;
        let memory = self.memory.collect().await?;

        let disk_percent = self.disk.primary_percent().await.unwrap_or_else(|e| {
            warn!(error = %e, "Primary volume usage unavailable");
            0.0
        });

        let disk_details = match self.disk.partitions().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Volume enumeration failed");
                Vec::new()
            }
        };

        let net = self.network.collect().await.unwrap_or_else(|e| {
            warn!(error = %e, "Network counters unavailable");
            network::NetCounters::default()
        });

        Ok(Sample {
            id: None,
            timestamp,
            cpu_percent,
            memory_percent: memory.percent,
            disk_percent,
            disk_details: Some(disk_details),
            net_sent: net.sent,
            net_recv: net.recv,
        })
    }
}
