use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::statvfs::statvfs;
use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::types::DiskPartition;
use super::cpu::round1;

/// Per-volume disk usage from /proc/mounts and statvfs(2)
pub struct DiskCollector {
    mounts_path: String,
    exclude_prefix: String,
    exclude_fstypes: Vec<String>,
    primary_mount: String,
    volume_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
struct MountEntry {
    device: String,
    mountpoint: String,
    fstype: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub percent: f64,
}

impl DiskCollector {
    pub fn new(config: &SamplerConfig) -> Self {
        Self {
            mounts_path: format!("{}/mounts", config.proc_root),
            exclude_prefix: config.exclude_mount_prefix.clone(),
            exclude_fstypes: config.exclude_fstypes.clone(),
            primary_mount: config.primary_mount.clone(),
            volume_timeout: config.volume_timeout(),
        }
    }

    /// Usage percent of the primary volume
    pub async fn primary_percent(&self) -> Result<f64> {
        let path = self.primary_mount.clone();
        let usage = off_thread(self.volume_timeout, "statvfs", move || volume_usage(&path))
            .await?
            .with_context(|| format!("statvfs failed for {}", self.primary_mount))?;
        Ok(usage.percent)
    }

    /// Every collectable volume, in mount-table order. Volumes that cannot be
    /// inspected are left out.
    pub async fn partitions(&self) -> Result<Vec<DiskPartition>> {
        let mounts = tokio::fs::read_to_string(&self.mounts_path)
            .await
            .with_context(|| format!("Failed to read {}", self.mounts_path))?;

        let mut entries: Vec<MountEntry> = Vec::new();
        for entry in parse_mounts(&mounts) {
            if self.is_excluded(&entry) { continue; }
            if entries.iter().any(|e| e.mountpoint == entry.mountpoint) { continue; }
            entries.push(entry);
        }

        off_thread(self.volume_timeout, "Volume enumeration", move || inspect_volumes(entries)).await
    }

    fn is_excluded(&self, entry: &MountEntry) -> bool {
        (!self.exclude_prefix.is_empty() && entry.mountpoint.starts_with(&self.exclude_prefix))
            || self.exclude_fstypes.iter().any(|f| f == &entry.fstype)
    }
}

fn inspect_volumes(entries: Vec<MountEntry>) -> Vec<DiskPartition> {
    let mut partitions = Vec::with_capacity(entries.len());
    for entry in entries {
        match volume_usage(&entry.mountpoint) {
            Ok(usage) => partitions.push(DiskPartition {
                device: entry.device,
                mountpoint: entry.mountpoint,
                total: usage.total,
                used: usage.used,
                free: usage.free,
                percent: usage.percent,
            }),
            Err(Errno::EACCES) | Err(Errno::EPERM) => {
                debug!(mountpoint = %entry.mountpoint, "Skipping volume without permission");
            }
            Err(e) => {
                warn!(mountpoint = %entry.mountpoint, error = %e, "Skipping unreadable volume");
            }
        }
    }
    partitions
}

/// Run a blocking filesystem call on the blocking pool. On timeout the call
/// is abandoned, not interrupted; its thread finishes whenever the kernel
/// returns.
async fn off_thread<T, F>(timeout: Duration, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(joined) => joined.with_context(|| format!("{} task panicked", what)),
        Err(_) => anyhow::bail!("{} timed out after {:?}", what, timeout),
    }
}

fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 { return None; }
            Some(MountEntry {
                device: unescape_mount_field(parts[0]),
                mountpoint: unescape_mount_field(parts[1]),
                fstype: parts[2].to_string(),
            })
        })
        .collect()
}

/// /proc/mounts encodes space, tab, newline and backslash as octal escapes
fn unescape_mount_field(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

pub fn volume_usage(path: &str) -> nix::Result<VolumeUsage> {
    let st = statvfs(path)?;
    let frsize = st.fragment_size() as u64;
    let total = st.blocks() as u64 * frsize;
    let free_root = st.blocks_free() as u64 * frsize;
    let free = st.blocks_available() as u64 * frsize;
    Ok(usage_from_counts(total, free_root, free))
}

/// Percent is relative to the space usable by unprivileged users, which is
/// what `df` reports.
fn usage_from_counts(total: u64, free_root: u64, free: u64) -> VolumeUsage {
    let used = total.saturating_sub(free_root);
    let usable = used + free;
    let percent = if usable > 0 { round1(100.0 * used as f64 / usable as f64) } else { 0.0 };
    VolumeUsage { total, used, free, percent }
}
