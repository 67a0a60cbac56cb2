use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::config::StorageConfig;
use crate::types::{DiskPartition, Sample};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metrics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp INTEGER NOT NULL,
        cpu_percent REAL NOT NULL,
        memory_percent REAL NOT NULL,
        disk_percent REAL NOT NULL,
        disk_details TEXT,
        net_sent INTEGER NOT NULL,
        net_recv INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON metrics(timestamp);
";

const COLUMNS: &str =
    "id, timestamp, cpu_percent, memory_percent, disk_percent, disk_details, net_sent, net_recv";

/// Time-series sample table backed by SQLite.
///
/// Cloning is cheap; all clones share two connections. `append` and `trim`
/// go through the writer, every read goes through a separate reader. With
/// WAL journaling a read in progress never holds up the writer.
#[derive(Clone)]
pub struct Storage {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        Self::open(&config.path)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }

        let writer = open_connection(path)?;
        let mode: String = writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        writer.execute_batch(SCHEMA).context("Failed to create schema")?;

        let reader = open_connection(path)?;
        reader.pragma_update(None, "query_only", true)?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened sample store");

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    /// Private in-memory database. Both roles share one connection, since a
    /// second connection would see a different database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA).context("Failed to create schema")?;
        let conn = Arc::new(Mutex::new(conn));
        Ok(Self { writer: conn.clone(), reader: conn })
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| anyhow!("sample store writer lock poisoned"))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader.lock().map_err(|_| anyhow!("sample store reader lock poisoned"))
    }

    /// Persist one sample and return the id the store assigned to it.
    pub fn append(&self, sample: &Sample) -> Result<i64> {
        let details = serde_json::to_string(sample.disk_details.as_deref().unwrap_or(&[]))?;
        let conn = self.writer()?;
        conn.execute(
            "INSERT INTO metrics (timestamp, cpu_percent, memory_percent, disk_percent, disk_details, net_sent, net_recv)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sample.timestamp.timestamp_millis(),
                sample.cpu_percent,
                sample.memory_percent,
                sample.disk_percent,
                details,
                clamp_counter(sample.net_sent),
                clamp_counter(sample.net_recv),
            ],
        )
        .context("Failed to insert sample")?;
        Ok(conn.last_insert_rowid())
    }

    /// Delete every sample older than `now - horizon`.
    pub fn trim(&self, horizon: Duration) -> Result<usize> {
        self.trim_at(horizon, Utc::now())
    }

    pub fn trim_at(&self, horizon: Duration, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = (now - horizon).timestamp_millis();
        let removed = self
            .writer()?
            .execute("DELETE FROM metrics WHERE timestamp < ?1", params![cutoff])
            .context("Failed to trim samples")?;
        Ok(removed)
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Result<Option<Sample>> {
        let conn = self.reader()?;
        let sample = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM metrics ORDER BY timestamp DESC, id DESC LIMIT 1"),
                [],
                sample_from_row,
            )
            .optional()
            .context("Failed to query latest sample")?;
        Ok(sample)
    }

    /// Samples with `timestamp >= since`, oldest first.
    pub fn since(&self, since: DateTime<Utc>) -> Result<Vec<Sample>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {COLUMNS} FROM metrics WHERE timestamp >= ?1 ORDER BY timestamp ASC, id ASC"
        ))?;
        let samples = stmt
            .query_map(params![since.timestamp_millis()], sample_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to query sample window")?;
        Ok(samples)
    }

    pub fn count(&self) -> Result<u64> {
        let n: i64 = self.reader()?.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

// SQLite integers are signed; byte counters never get near the limit.
fn clamp_counter(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<Sample> {
    let id: i64 = row.get(0)?;
    let millis: i64 = row.get(1)?;
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(1, millis))?;
    let raw_details: Option<String> = row.get(5)?;
    let net_sent: i64 = row.get(6)?;
    let net_recv: i64 = row.get(7)?;

    Ok(Sample {
        id: Some(id),
        timestamp,
        cpu_percent: row.get(2)?,
        memory_percent: row.get(3)?,
        disk_percent: row.get(4)?,
        disk_details: decode_disk_details(id, raw_details.as_deref()),
        net_sent: net_sent.max(0) as u64,
        net_recv: net_recv.max(0) as u64,
    })
}

/// `None` means the stored payload exists but is not a valid partition list.
fn decode_disk_details(id: i64, raw: Option<&str>) -> Option<Vec<DiskPartition>> {
    match raw {
        None | Some("") => Some(Vec::new()),
        Some(text) => match serde_json::from_str(text) {
            Ok(details) => Some(details),
            Err(e) => {
                warn!(sample_id = id, error = %e, "Stored disk details are not valid JSON");
                None
            }
        },
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn sample_at(timestamp: DateTime<Utc>, cpu: f64) -> Sample {
        Sample {
            id: None,
            timestamp,
            cpu_percent: cpu,
            memory_percent: 40.0,
            disk_percent: 55.5,
            disk_details: Some(vec![DiskPartition {
                device: "/dev/sda1".into(),
                mountpoint: "/".into(),
                total: 100_000,
                used: 55_500,
                free: 44_500,
                percent: 55.5,
            }]),
            net_sent: 1_024,
            net_recv: 4_096,
        }
    }

    /// Run raw SQL on the writer connection
    pub(crate) fn exec_sql(storage: &Storage, sql: &str) {
        storage.writer().unwrap().execute_batch(sql).unwrap();
    }

    pub(crate) fn restore_schema(storage: &Storage) {
        exec_sql(storage, SCHEMA);
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn latest_returns_appended_values() {
        let storage = Storage::in_memory().unwrap();
        assert!(storage.latest().unwrap().is_none());

        let sample = sample_at(base(), 12.5);
        let id = storage.append(&sample).unwrap();

        let latest = storage.latest().unwrap().unwrap();
        assert_eq!(latest.id, Some(id));
        assert_eq!(Sample { id: None, ..latest }, sample);
    }

    #[test]
    fn ids_increase_with_timestamps() {
        let storage = Storage::in_memory().unwrap();
        let a = storage.append(&sample_at(base(), 1.0)).unwrap();
        let b = storage.append(&sample_at(base() + Duration::seconds(5), 2.0)).unwrap();
        assert!(b > a);
        assert_eq!(storage.latest().unwrap().unwrap().cpu_percent, 2.0);
    }

    #[test]
    fn trim_boundary_is_exact() {
        let storage = Storage::in_memory().unwrap();
        let now = base();
        let horizon = Duration::days(7);
        let cutoff = now - horizon;

        storage.append(&sample_at(cutoff - Duration::milliseconds(1), 1.0)).unwrap();
        storage.append(&sample_at(cutoff - Duration::days(1), 2.0)).unwrap();
        storage.append(&sample_at(cutoff, 3.0)).unwrap();
        storage.append(&sample_at(now, 4.0)).unwrap();

        let removed = storage.trim_at(horizon, now).unwrap();
        assert_eq!(removed, 2);

        let left: Vec<f64> = storage
            .since(cutoff - Duration::days(30))
            .unwrap()
            .iter()
            .map(|s| s.cpu_percent)
            .collect();
        assert_eq!(left, vec![3.0, 4.0]);
    }

    #[test]
    fn since_is_ascending_and_inclusive() {
        let storage = Storage::in_memory().unwrap();
        let start = base();
        for (offset, cpu) in [(20, 3.0), (0, 1.0), (10, 2.0)] {
            storage.append(&sample_at(start + Duration::minutes(offset), cpu)).unwrap();
        }

        let rows = storage.since(start + Duration::minutes(10)).unwrap();
        let values: Vec<f64> = rows.iter().map(|s| s.cpu_percent).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn malformed_disk_details_decode_to_none() {
        let storage = Storage::in_memory().unwrap();
        let id = storage.append(&sample_at(base(), 1.0)).unwrap();
        storage
            .writer()
            .unwrap()
            .execute("UPDATE metrics SET disk_details = 'not json' WHERE id = ?1", params![id])
            .unwrap();

        let latest = storage.latest().unwrap().unwrap();
        assert!(latest.disk_details.is_none());
        assert_eq!(latest.cpu_percent, 1.0);
    }

    #[test]
    fn open_creates_file_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");

        {
            let storage = Storage::open(&path).unwrap();
            storage.append(&sample_at(base(), 7.0)).unwrap();
        }

        let reopened = Storage::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.latest().unwrap().unwrap().cpu_percent, 7.0);
    }

    #[test]
    fn open_read_transaction_does_not_block_append() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("metrics.db")).unwrap();
        storage.append(&sample_at(base(), 1.0)).unwrap();

        // Hold the reader mid-transaction with a snapshot pinned
        let reader = storage.reader().unwrap();
        reader.execute_batch("BEGIN").unwrap();
        let seen: i64 = reader.query_row("SELECT COUNT(*) FROM metrics", [], |r| r.get(0)).unwrap();
        assert_eq!(seen, 1);

        let started = std::time::Instant::now();
        storage.append(&sample_at(base() + Duration::seconds(5), 2.0)).unwrap();
        storage.trim_at(Duration::days(7), base() + Duration::days(30)).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        reader.execute_batch("COMMIT").unwrap();
        drop(reader);
        assert_eq!(storage.count().unwrap(), 0);
    }

    #[test]
    fn long_history_reads_do_not_stall_appends() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("metrics.db")).unwrap();
        for i in 0..2_000 {
            storage.append(&sample_at(base() + Duration::seconds(i * 5), 1.0)).unwrap();
        }

        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        std::thread::scope(|scope| {
            let reader = storage.clone();
            let stop_reader = stop.clone();
            scope.spawn(move || {
                while !stop_reader.load(std::sync::atomic::Ordering::Relaxed) {
                    assert!(reader.since(base()).unwrap().len() >= 2_000);
                }
            });

            for i in 0..50 {
                storage.append(&sample_at(base() + Duration::days(1) + Duration::seconds(i), 2.0)).unwrap();
            }
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });

        assert_eq!(storage.count().unwrap(), 2_050);
    }

    #[test]
    fn reader_connection_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("metrics.db")).unwrap();
        let denied = storage.reader().unwrap().execute("DELETE FROM metrics", []);
        assert!(denied.is_err());
    }
}
