use tracing::warn;

use crate::collector::memory::parse_meminfo;
use crate::types::SystemInfo;

/// Collect static host facts
pub fn collect_system_info(proc_root: &str, hostname: &str) -> SystemInfo {
    SystemInfo {
        hostname: hostname.to_string(),
        platform: platform_name(),
        uptime_seconds: read_uptime(proc_root).unwrap_or(0.0),
        cpu_count: cpu_count(),
        memory_total: read_memory_total(proc_root).unwrap_or(0),
    }
}

fn platform_name() -> String {
    let mut chars = std::env::consts::OS.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "unknown".to_string(),
    }
}

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn read_uptime(proc_root: &str) -> Option<f64> {
    let path = format!("{}/uptime", proc_root);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to read uptime");
            return None;
        }
    };
    parse_uptime(&content)
}

fn parse_uptime(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

fn read_memory_total(proc_root: &str) -> Option<u64> {
    let path = format!("{}/meminfo", proc_root);
    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to read meminfo");
            return None;
        }
    };
    parse_meminfo(&content).map(|m| m.total_bytes)
}
