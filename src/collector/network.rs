use anyhow::{Context, Result};

/// Cumulative network byte counters from /proc/net/dev
pub struct NetworkCollector {
    dev_path: String,
    exclude_interfaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub sent: u64,
    pub recv: u64,
}

impl NetworkCollector {
    pub fn new(proc_root: &str, exclude_interfaces: &[String]) -> Self {
        Self {
            dev_path: format!("{}/net/dev", proc_root),
            exclude_interfaces: exclude_interfaces.to_vec(),
        }
    }

    /// Bytes sent/received since boot, summed over all included interfaces
    pub async fn collect(&self) -> Result<NetCounters> {
        let content = tokio::fs::read_to_string(&self.dev_path)
            .await
            .with_context(|| format!("Failed to read {}", self.dev_path))?;
        Ok(self.parse(&content))
    }

    fn parse(&self, content: &str) -> NetCounters {
        let mut totals = NetCounters::default();

        for line in content.lines().skip(2) {
            // Older kernels glue the first counter to the colon
            let Some((iface, counters)) = line.split_once(':') else { continue };
            let iface = iface.trim();
            if self.exclude_interfaces.iter().any(|e| e == iface) { continue; }

            let parts: Vec<&str> = counters.split_whitespace().collect();
            if parts.len() < 16 { continue; }

            totals.recv += parts[0].parse::<u64>().unwrap_or(0);
            totals.sent += parts[8].parse::<u64>().unwrap_or(0);
        }

        totals
    }
}
