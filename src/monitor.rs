use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::alerter::{message, AlertManager};
use crate::analyzer::{Evaluation, ThresholdEvaluator};
use crate::config::Config;
use crate::health::HealthProbe;
use crate::query::SeriesQuery;
use crate::types::HealthCheckResult;

/// One health-check cycle: probe the monitored URL, evaluate resource
/// thresholds, notify on anything that needs attention.
pub struct Monitor {
    probe: Option<(HealthProbe, String)>,
    evaluator: ThresholdEvaluator,
    alerter: AlertManager,
    hostname: String,
    lookback_minutes: u32,
}

#[derive(Debug)]
pub struct RunReport {
    /// `None` when no URL is configured
    pub health: Option<HealthCheckResult>,
    /// `Err` carries the storage failure as text; the run itself still completes
    pub evaluation: Result<Evaluation, String>,
    pub notifications_sent: usize,
}

impl Monitor {
    pub fn new(config: &Config, query: SeriesQuery, alerter: AlertManager) -> Result<Self> {
        let probe = match config.health.url {
            Some(ref url) if !url.trim().is_empty() => {
                Some((HealthProbe::new(&config.health)?, url.trim().to_string()))
            }
            _ => None,
        };

        Ok(Self {
            probe,
            evaluator: ThresholdEvaluator::new(query, &config.thresholds),
            alerter,
            hostname: config.agent.hostname.clone(),
            lookback_minutes: config.thresholds.lookback_minutes,
        })
    }

    pub async fn run(&self) -> RunReport {
        let mut sent = 0;

        let health = self.check_health().await;
        if let Some(ref result) = health {
            if result.status.needs_alert() {
                sent += self.alerter.dispatch(&message::health_alert(result, &self.hostname)).await;
            }
        }

        let evaluation = self.check_system().await;
        if let Ok(ref eval) = evaluation {
            for event in eval.alerts() {
                info!(
                    metric = %event.metric,
                    value = event.value,
                    threshold = event.threshold,
                    "Threshold exceeded"
                );
                let note = message::system_alert(event, self.lookback_minutes, &self.hostname);
                sent += self.alerter.dispatch(&note).await;
            }
        }

        info!(notifications = sent, "Health check complete");
        RunReport {
            health,
            evaluation: evaluation.map_err(|e| format!("{:#}", e)),
            notifications_sent: sent,
        }
    }

    async fn check_health(&self) -> Option<HealthCheckResult> {
        let Some((ref probe, ref url)) = self.probe else {
            info!("No monitored URL configured, skipping health probe");
            return None;
        };

        let result = probe.check(url).await;
        info!(
            url = %result.url,
            status = %result.status,
            message = %result.message,
            "Health probe finished"
        );
        Some(result)
    }

    async fn check_system(&self) -> Result<Evaluation> {
        let evaluator = self.evaluator.clone();
        let evaluation = tokio::task::spawn_blocking(move || evaluator.evaluate())
            .await
            .context("Evaluation task panicked")?;

        match evaluation {
            Ok(Evaluation::NoData) => {
                info!(lookback_minutes = self.lookback_minutes, "No metrics in lookback window");
            }
            Ok(Evaluation::Evaluated(ref s)) if s.alerts.is_empty() => {
                info!(samples = s.samples, avg_cpu = s.avg_cpu, avg_memory = s.avg_memory, "All metrics within thresholds");
            }
            Ok(Evaluation::Evaluated(ref s)) => {
                warn!(samples = s.samples, alerts = s.alerts.len(), "Resource thresholds exceeded");
            }
            Err(ref e) => {
                warn!(error = %e, "System metrics check failed");
            }
        }
        evaluation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerter::tests::RecordingNotifier;
    use crate::storage::tests::sample_at;
    use crate::storage::Storage;
    use crate::types::HealthStatus;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn monitor_with(config: &Config, storage: Storage) -> (Monitor, RecordingNotifier) {
        let recorder = RecordingNotifier::default();
        let alerter = AlertManager::with_channels(vec![Box::new(recorder.clone())]);
        let monitor = Monitor::new(config, SeriesQuery::new(storage), alerter).unwrap();
        (monitor, recorder)
    }

    #[tokio::test]
    async fn no_url_and_no_data_is_quiet() {
        let (monitor, recorder) = monitor_with(&Config::default(), Storage::in_memory().unwrap());
        let report = monitor.run().await;

        assert!(report.health.is_none());
        assert_eq!(report.evaluation, Ok(Evaluation::NoData));
        assert_eq!(report.notifications_sent, 0);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sustained_cpu_sends_system_alert() {
        let storage = Storage::in_memory().unwrap();
        for cpu in [96.0, 97.0, 98.0] {
            storage.append(&sample_at(Utc::now(), cpu)).unwrap();
        }

        let (monitor, recorder) = monitor_with(&Config::default(), storage);
        let report = monitor.run().await;

        assert_eq!(report.notifications_sent, 1);
        let sent = recorder.sent.lock().unwrap();
        assert!(sent[0].subject.starts_with("System Alert: CPU"));
    }

    #[tokio::test]
    async fn offline_target_sends_health_alert() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut config = Config::default();
        config.health.url = Some(format!("http://{}/", addr));
        let (monitor, recorder) = monitor_with(&config, Storage::in_memory().unwrap());
        let report = monitor.run().await;

        assert_eq!(report.health.unwrap().status, HealthStatus::Offline);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(recorder.sent.lock().unwrap()[0].subject, "Platform Alert: OFFLINE");
    }

    #[tokio::test]
    async fn online_target_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 303 See Other\r\nLocation: /web\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
        });

        let mut config = Config::default();
        config.health.url = Some(format!("http://{}/", addr));
        let (monitor, recorder) = monitor_with(&config, Storage::in_memory().unwrap());
        let report = monitor.run().await;

        assert_eq!(report.health.unwrap().status, HealthStatus::Online);
        assert_eq!(report.notifications_sent, 0);
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_fail_run() {
        let storage = Storage::in_memory().unwrap();
        storage.append(&sample_at(Utc::now(), 99.0)).unwrap();

        let failing = RecordingNotifier { fail: true, ..Default::default() };
        let alerter = AlertManager::with_channels(vec![Box::new(failing)]);
        let monitor = Monitor::new(&Config::default(), SeriesQuery::new(storage), alerter).unwrap();
        let report = monitor.run().await;

        assert_eq!(report.evaluation.unwrap().alerts().len(), 1);
        assert_eq!(report.notifications_sent, 0);
    }
}
