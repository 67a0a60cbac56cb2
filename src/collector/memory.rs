use anyhow::{Context, Result};

use super::cpu::round1;

/// Memory usage from /proc/meminfo
pub struct MemoryCollector {
    meminfo_path: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub percent: f64,
}

impl MemoryCollector {
    pub fn new(proc_root: &str) -> Self {
        Self { meminfo_path: format!("{}/meminfo", proc_root) }
    }

    pub async fn collect(&self) -> Result<MemoryUsage> {
        let content = tokio::fs::read_to_string(&self.meminfo_path)
            .await
            .with_context(|| format!("Failed to read {}", self.meminfo_path))?;
        parse_meminfo(&content)
            .with_context(|| format!("MemTotal missing from {}", self.meminfo_path))
    }
}

pub fn parse_meminfo(content: &str) -> Option<MemoryUsage> {
    let mut total_kb = 0u64;
    let mut available_kb = 0u64;
    let mut free_kb = 0u64;
    let mut buffers_kb = 0u64;
    let mut cached_kb = 0u64;
    let mut has_available = false;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 { continue; }
        let val: u64 = parts[1].parse().unwrap_or(0);
        match parts[0] {
            "MemTotal:" => total_kb = val,
            "MemAvailable:" => { available_kb = val; has_available = true; }
            "MemFree:" => free_kb = val,
            "Buffers:" => buffers_kb = val,
            "Cached:" => cached_kb = val,
            _ => {}
        }
    }

    // Fallback for kernels without MemAvailable
    if !has_available {
        available_kb = free_kb + buffers_kb + cached_kb;
    }

    if total_kb == 0 {
        return None;
    }

    let available_kb = available_kb.min(total_kb);
    Some(MemoryUsage {
        total_bytes: total_kb * 1024,
        available_bytes: available_kb * 1024,
        percent: round1(100.0 * (1.0 - available_kb as f64 / total_kb as f64)),
    })
}
