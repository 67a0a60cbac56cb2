use anyhow::{Context, Result};

/// Aggregate CPU usage from /proc/stat, computed between consecutive reads
pub struct CpuCollector {
    stat_path: String,
    prev: Option<(u64, u64)>, // (total, idle)
}

impl CpuCollector {
    pub fn new(proc_root: &str) -> Self {
        Self {
            stat_path: format!("{}/stat", proc_root),
            prev: None,
        }
    }

    /// Usage since the previous call. The first call has no baseline and
    /// reports 0.0.
    pub async fn collect(&mut self) -> Result<f64> {
        let content = tokio::fs::read_to_string(&self.stat_path)
            .await
            .with_context(|| format!("Failed to read {}", self.stat_path))?;
        self.update(&content)
            .with_context(|| format!("No aggregate cpu line in {}", self.stat_path))
    }

    fn update(&mut self, content: &str) -> Option<f64> {
        let (total, idle) = parse_aggregate(content)?;

        let usage = match self.prev {
            Some((prev_total, prev_idle)) => {
                let d_total = total.saturating_sub(prev_total);
                let d_idle = idle.saturating_sub(prev_idle);
                if d_total > 0 {
                    (100.0 * (1.0 - d_idle as f64 / d_total as f64)).clamp(0.0, 100.0)
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        self.prev = Some((total, idle));
        Some(round1(usage))
    }
}

/// (total, idle + iowait) jiffies from the `cpu ` line
fn parse_aggregate(content: &str) -> Option<(u64, u64)> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();

    if fields.len() < 4 {
        return None;
    }

    // guest and guest_nice are already counted in user and nice
    let total: u64 = fields.iter().take(8).sum();
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some((total, idle))
}

pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
