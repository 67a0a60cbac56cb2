use anyhow::Result;
use tracing::{debug, warn};

use crate::config::ThresholdConfig;
use crate::query::SeriesQuery;
use crate::types::{AlertEvent, MetricKind, Sample};

/// Outcome of one threshold evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Nothing was collected within the lookback window
    NoData,
    Evaluated(Summary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub samples: usize,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub alerts: Vec<AlertEvent>,
}

impl Evaluation {
    pub fn alerts(&self) -> &[AlertEvent] {
        match self {
            Evaluation::NoData => &[],
            Evaluation::Evaluated(summary) => &summary.alerts,
        }
    }
}

/// Compares windowed CPU/memory averages and the latest per-volume disk usage
/// against configured limits.
#[derive(Clone)]
pub struct ThresholdEvaluator {
    query: SeriesQuery,
    thresholds: ThresholdConfig,
}

impl ThresholdEvaluator {
    pub fn new(query: SeriesQuery, config: &ThresholdConfig) -> Self {
        Self { query, thresholds: config.clone() }
    }

    pub fn evaluate(&self) -> Result<Evaluation> {
        let samples = self.query.window(self.thresholds.lookback())?;
        Ok(self.evaluate_samples(&samples))
    }

    /// `samples` must be in ascending timestamp order.
    pub fn evaluate_samples(&self, samples: &[Sample]) -> Evaluation {
        let Some(latest) = samples.last() else {
            debug!(lookback_minutes = self.thresholds.lookback_minutes, "No samples in lookback window");
            return Evaluation::NoData;
        };

        let n = samples.len();
        let avg_cpu = samples.iter().map(|s| s.cpu_percent).sum::<f64>() / n as f64;
        let avg_memory = samples.iter().map(|s| s.memory_percent).sum::<f64>() / n as f64;

        debug!(
            samples = n,
            avg_cpu,
            avg_memory,
            "Evaluated lookback window"
        );

        let mut alerts = Vec::new();

        if avg_cpu >= self.thresholds.cpu_percent {
            alerts.push(AlertEvent {
                metric: MetricKind::Cpu,
                value: avg_cpu,
                threshold: self.thresholds.cpu_percent,
                details: format!("Average CPU usage: {:.1}% over {} samples", avg_cpu, n),
            });
        }

        if avg_memory >= self.thresholds.memory_percent {
            alerts.push(AlertEvent {
                metric: MetricKind::Memory,
                value: avg_memory,
                threshold: self.thresholds.memory_percent,
                details: format!("Average memory usage: {:.1}% over {} samples", avg_memory, n),
            });
        }

        if let Some(a) = self.check_disk(latest) {
            alerts.push(a);
        }

        Evaluation::Evaluated(Summary { samples: n, avg_cpu, avg_memory, alerts })
    }

    /// Point-in-time check of the monitored mountpoints in one sample
    fn check_disk(&self, latest: &Sample) -> Option<AlertEvent> {
        let Some(details) = latest.disk_details.as_ref() else {
            warn!(sample_id = ?latest.id, "Skipping disk check, stored disk details are unreadable");
            return None;
        };

        let threshold = self.thresholds.disk_percent;
        let breaching: Vec<_> = details
            .iter()
            .filter(|d| self.thresholds.monitored_mountpoints.iter().any(|m| m == &d.mountpoint))
            .filter(|d| d.percent >= threshold)
            .collect();

        let value = breaching.iter().map(|d| d.percent).reduce(f64::max)?;

        let lines: Vec<String> = breaching
            .iter()
            .map(|d| format!("{}: {:.1}%", d.mountpoint, d.percent))
            .collect();

        Some(AlertEvent {
            metric: MetricKind::Disk,
            value,
            threshold,
            details: format!("Mountpoints exceeding threshold:\n{}", lines.join("\n")),
        })
    }
}
