use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { hostname: default_hostname(), log_level: default_log_level() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplerConfig {
    #[serde(default = "default_sample_interval")]
    pub interval_secs: u64,
    /// Volumes mounted under this prefix are never collected
    #[serde(default = "default_exclude_mount_prefix")]
    pub exclude_mount_prefix: String,
    #[serde(default = "default_exclude_fstypes")]
    pub exclude_fstypes: Vec<String>,
    #[serde(default = "default_exclude_interfaces")]
    pub exclude_interfaces: Vec<String>,
    /// Volume reported as `disk_percent`
    #[serde(default = "default_primary_mount")]
    pub primary_mount: String,
    #[serde(default = "default_proc_root")]
    pub proc_root: String,
    /// Upper bound on one round of statvfs calls; a hung mount forfeits the
    /// disk readings for that tick
    #[serde(default = "default_volume_timeout")]
    pub volume_timeout_secs: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sample_interval(),
            exclude_mount_prefix: default_exclude_mount_prefix(),
            exclude_fstypes: default_exclude_fstypes(),
            exclude_interfaces: default_exclude_interfaces(),
            primary_mount: default_primary_mount(),
            proc_root: default_proc_root(),
            volume_timeout_secs: default_volume_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl SamplerConfig {
    pub fn volume_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.volume_timeout_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_db_path(), retention_days: default_retention_days() }
    }
}

impl StorageConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThresholdConfig {
    #[serde(default = "default_95")]
    pub cpu_percent: f64,
    #[serde(default = "default_90")]
    pub memory_percent: f64,
    #[serde(default = "default_95")]
    pub disk_percent: f64,
    #[serde(default = "default_lookback")]
    pub lookback_minutes: u32,
    #[serde(default = "default_monitored_mountpoints")]
    pub monitored_mountpoints: Vec<String>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 95.0,
            memory_percent: 90.0,
            disk_percent: 95.0,
            lookback_minutes: default_lookback(),
            monitored_mountpoints: default_monitored_mountpoints(),
        }
    }
}

impl ThresholdConfig {
    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.lookback_minutes))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Monitored URL. Unset disables the probe.
    pub url: Option<String>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
    /// Substring a redirect `Location` must contain to count as online
    #[serde(default = "default_expected_redirect")]
    pub expected_redirect: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_probe_timeout(),
            expected_redirect: default_expected_redirect(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Route prefix such as "/monitoring"; empty serves from the root
    #[serde(default)]
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind: default_bind(), prefix: String::new() }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertingConfig {
    #[serde(default)]
    pub mail: Option<MailRelayConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
}

/// HTTP mail relay that accepts a sender, recipients and content as JSON
#[derive(Debug, Deserialize, Clone)]
pub struct MailRelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub url: String,
    pub api_key: Option<String>,
    pub sender: Option<String>,
    #[serde(default)]
    pub recipients: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub webhook_url: String,
    pub channel: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sampler.interval_secs == 0 {
            anyhow::bail!("sampler.interval_secs must be greater than zero");
        }
        if self.sampler.volume_timeout_secs == 0 {
            anyhow::bail!("sampler.volume_timeout_secs must be greater than zero");
        }
        if self.health.timeout_secs == 0 {
            anyhow::bail!("health.timeout_secs must be greater than zero");
        }
        if self.health.expected_redirect.trim().is_empty() {
            anyhow::bail!("health.expected_redirect must not be empty");
        }
        let thresholds = [
            ("cpu_percent", self.thresholds.cpu_percent),
            ("memory_percent", self.thresholds.memory_percent),
            ("disk_percent", self.thresholds.disk_percent),
        ];
        for (name, value) in thresholds {
            if !(0.0..=100.0).contains(&value) {
                anyhow::bail!("thresholds.{} must be between 0 and 100, got {}", name, value);
            }
        }
        if !self.api.prefix.is_empty() && !self.api.prefix.starts_with('/') {
            anyhow::bail!("api.prefix must start with '/'");
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_default()
        })
        .to_string())
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_sample_interval() -> u64 { 5 }
fn default_exclude_mount_prefix() -> String { "/snap".to_string() }
fn default_exclude_fstypes() -> Vec<String> {
    ["tmpfs", "devtmpfs", "sysfs", "proc", "cgroup", "cgroup2", "devpts", "mqueue", "squashfs"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_exclude_interfaces() -> Vec<String> { vec!["lo".into()] }
fn default_primary_mount() -> String { "/".to_string() }
fn default_proc_root() -> String { "/proc".to_string() }
fn default_volume_timeout() -> u64 { 5 }
fn default_db_path() -> String { "metrics.db".to_string() }
fn default_retention_days() -> u32 { 7 }
fn default_90() -> f64 { 90.0 }
fn default_95() -> f64 { 95.0 }
fn default_lookback() -> u32 { 15 }
fn default_monitored_mountpoints() -> Vec<String> {
    vec!["/".into(), "/boot/efi".into(), "/mnt".into(), "/mnt/data".into()]
}
fn default_probe_timeout() -> u64 { 10 }
fn default_expected_redirect() -> String { "/web".to_string() }
fn default_bind() -> String { "0.0.0.0:8004".to_string() }
fn default_true() -> bool { true }
