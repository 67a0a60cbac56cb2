use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::SnapshotSource;
use crate::config::Config;
use crate::storage::Storage;

/// Background writer: one snapshot per interval, then a retention trim.
pub struct Sampler {
    source: Box<dyn SnapshotSource>,
    storage: Storage,
    interval: Duration,
    retention: chrono::Duration,
    last_net: Option<(u64, u64)>,
}

impl Sampler {
    pub fn new(source: Box<dyn SnapshotSource>, storage: Storage, config: &Config) -> Self {
        Self::with_schedule(
            source,
            storage,
            Duration::from_secs(config.sampler.interval_secs),
            config.storage.retention(),
        )
    }

    pub fn with_schedule(
        source: Box<dyn SnapshotSource>,
        storage: Storage,
        interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        Self { source, storage, interval, retention, last_net: None }
    }

    /// Collect, persist and trim once. Returns the id of the stored sample.
    ///
    /// A failed trim is logged and does not fail the tick; the sample is
    /// already stored at that point.
    pub async fn tick(&mut self) -> Result<i64> {
        let sample = self.source.snapshot().await?;

        if let Some((sent, recv)) = self.last_net {
            if sample.net_sent < sent || sample.net_recv < recv {
                info!(
                    prev_sent = sent,
                    prev_recv = recv,
                    sent = sample.net_sent,
                    recv = sample.net_recv,
                    "Network counters went backwards, host was likely rebooted"
                );
            }
        }
        self.last_net = Some((sample.net_sent, sample.net_recv));

        let storage = self.storage.clone();
        let retention = self.retention;
        let (id, trimmed) = tokio::task::spawn_blocking(move || -> Result<_> {
            let id = storage.append(&sample)?;
            Ok((id, storage.trim(retention)))
        })
        .await
        .context("Storage task panicked")??;

        match trimmed {
            Ok(0) => {}
            Ok(n) => debug!(removed = n, "Trimmed expired samples"),
            Err(e) => warn!(error = %e, "Retention trim failed"),
        }

        Ok(id)
    }

    /// Run until `shutdown` is cancelled. The wait between ticks is
    /// interrupted by cancellation; a tick in progress is not.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            source = self.source.name(),
            interval_secs = self.interval.as_secs_f64(),
            retention_hours = self.retention.num_hours(),
            "Sampler started"
        );

        while !shutdown.is_cancelled() {
            if let Err(e) = self.tick().await {
                warn!(source = self.source.name(), error = %e, "Sampling tick failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Sampler stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{exec_sql, restore_schema, sample_at};
    use crate::types::Sample;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` snapshots, then succeeds
    struct FlakySource {
        failures: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SnapshotSource for FlakySource {
        fn name(&self) -> &str { "flaky" }

        async fn snapshot(&mut self) -> Result<Sample> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                anyhow::bail!("simulated read failure {}", n);
            }
            Ok(sample_at(Utc::now(), 10.0 + n as f64))
        }
    }

    fn sampler(failures: usize, storage: &Storage, interval: Duration) -> (Sampler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let source = FlakySource { failures, calls: calls.clone() };
        let sampler = Sampler::with_schedule(
            Box::new(source),
            storage.clone(),
            interval,
            chrono::Duration::days(7),
        );
        (sampler, calls)
    }

    #[tokio::test]
    async fn tick_appends_and_trims() {
        let storage = Storage::in_memory().unwrap();
        storage.append(&sample_at(Utc::now() - chrono::Duration::days(8), 1.0)).unwrap();

        let (mut sampler, _) = sampler(0, &storage, Duration::from_secs(5));
        let id = sampler.tick().await.unwrap();

        assert_eq!(storage.count().unwrap(), 1);
        assert_eq!(storage.latest().unwrap().unwrap().id, Some(id));
    }

    #[tokio::test]
    async fn failing_ticks_do_not_stop_sampling() {
        let storage = Storage::in_memory().unwrap();
        let (mut sampler, _) = sampler(3, &storage, Duration::from_secs(5));

        for _ in 0..3 {
            assert!(sampler.tick().await.is_err());
        }
        assert_eq!(storage.count().unwrap(), 0);

        sampler.tick().await.unwrap();
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn run_survives_failures_and_stops_on_cancel() {
        let storage = Storage::in_memory().unwrap();
        let (sampler, calls) = sampler(2, &storage, Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        let handle = sampler.spawn(shutdown.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while storage.count().unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "sampler never stored a sample");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler did not stop")
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_long_sleep() {
        let storage = Storage::in_memory().unwrap();
        let (sampler, _) = sampler(0, &storage, Duration::from_secs(3600));
        let shutdown = CancellationToken::new();
        let handle = sampler.spawn(shutdown.clone());

        while storage.count().unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sleep was not interrupted")
            .unwrap();
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_append_fails_the_tick() {
        let storage = Storage::in_memory().unwrap();
        exec_sql(&storage, "DROP TABLE metrics");
        let (mut sampler, _) = sampler(0, &storage, Duration::from_secs(5));

        assert!(sampler.tick().await.is_err());

        restore_schema(&storage);
        sampler.tick().await.unwrap();
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_trim_keeps_the_stored_sample() {
        let storage = Storage::in_memory().unwrap();
        storage.append(&sample_at(Utc::now() - chrono::Duration::days(8), 1.0)).unwrap();
        exec_sql(
            &storage,
            "CREATE TRIGGER block_trim BEFORE DELETE ON metrics
             BEGIN SELECT RAISE(ABORT, 'trim blocked'); END;",
        );
        let (mut sampler, _) = sampler(0, &storage, Duration::from_secs(5));

        let id = sampler.tick().await.unwrap();

        assert_eq!(storage.count().unwrap(), 2);
        assert_eq!(storage.latest().unwrap().unwrap().id, Some(id));
    }

    #[tokio::test]
    async fn run_keeps_ticking_through_storage_errors() {
        let storage = Storage::in_memory().unwrap();
        exec_sql(&storage, "DROP TABLE metrics");
        let (sampler, calls) = sampler(0, &storage, Duration::from_millis(10));
        let shutdown = CancellationToken::new();
        let handle = sampler.spawn(shutdown.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) < 3 {
            assert!(tokio::time::Instant::now() < deadline, "sampler stopped ticking");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        restore_schema(&storage);
        while storage.count().unwrap() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "sampler never recovered");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sampler did not stop")
            .unwrap();
    }
}
