pub mod collector;
pub mod sampler;
pub mod storage;
pub mod query;
pub mod analyzer;
pub mod health;
pub mod alerter;
pub mod monitor;
pub mod inventory;
pub mod api;
pub mod config;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize, Serializer};

    /// Usage of one mounted volume at collection time
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct DiskPartition {
        pub device: String,
        pub mountpoint: String,
        pub total: u64,
        pub used: u64,
        pub free: u64,
        pub percent: f64,
    }

    /// One timestamped system-metrics record.
    ///
    /// `id` is assigned by the store; it is `None` for freshly collected
    /// samples and for the zero-value placeholder returned when the store is
    /// empty. `disk_details` is `None` when the persisted payload could not be
    /// decoded.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Sample {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<i64>,
        pub timestamp: DateTime<Utc>,
        pub cpu_percent: f64,
        pub memory_percent: f64,
        pub disk_percent: f64,
        #[serde(serialize_with = "serialize_disk_details")]
        pub disk_details: Option<Vec<DiskPartition>>,
        pub net_sent: u64,
        pub net_recv: u64,
    }

    impl Sample {
        /// The "no data yet" value: all metrics zero, stamped with `now`.
        pub fn empty(now: DateTime<Utc>) -> Self {
            Self {
                id: None,
                timestamp: now,
                cpu_percent: 0.0,
                memory_percent: 0.0,
                disk_percent: 0.0,
                disk_details: Some(Vec::new()),
                net_sent: 0,
                net_recv: 0,
            }
        }

        /// True for a sample that did not come out of the store.
        pub fn is_placeholder(&self) -> bool {
            self.id.is_none()
        }
    }

    // Undecodable details are served as an empty list.
    fn serialize_disk_details<S>(details: &Option<Vec<DiskPartition>>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match details {
            Some(d) => d.serialize(s),
            None => Vec::<DiskPartition>::new().serialize(s),
        }
    }

    /// Metric an alert event refers to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub enum MetricKind {
        Cpu,
        Memory,
        Disk,
    }

    impl std::fmt::Display for MetricKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let s = match self {
                MetricKind::Cpu => "CPU",
                MetricKind::Memory => "Memory",
                MetricKind::Disk => "Disk",
            };
            write!(f, "{}", s)
        }
    }

    /// A threshold breach produced by the evaluator
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct AlertEvent {
        pub metric: MetricKind,
        pub value: f64,
        pub threshold: f64,
        pub details: String,
    }

    /// Tri-state outcome of one external health probe
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum HealthStatus {
        Online,
        Error,
        Offline,
    }

    impl HealthStatus {
        /// Whether this outcome should be reported downstream
        pub fn needs_alert(&self) -> bool {
            !matches!(self, HealthStatus::Online)
        }
    }

    impl std::fmt::Display for HealthStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                HealthStatus::Online => write!(f, "online"),
                HealthStatus::Error => write!(f, "error"),
                HealthStatus::Offline => write!(f, "offline"),
            }
        }
    }

    #[derive(Debug, Clone, Serialize)]
    pub struct HealthCheckResult {
        pub url: String,
        pub status: HealthStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub redirect_location: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub response_time_ms: Option<f64>,
        pub checked_at: DateTime<Utc>,
        pub message: String,
    }

    /// Static host facts served by the API
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SystemInfo {
        pub hostname: String,
        pub platform: String,
        pub uptime_seconds: f64,
        pub cpu_count: usize,
        pub memory_total: u64,
    }
}
