use std::error::Error as _;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::HealthConfig;
use crate::types::{HealthCheckResult, HealthStatus};

const REDIRECT_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Single-shot HEAD probe against a monitored web application.
///
/// A healthy target answers with a redirect into its web client. Redirects
/// are not followed and certificate validation is off because monitored
/// hosts commonly run on self-issued certificates.
pub struct HealthProbe {
    client: reqwest::Client,
    expected_redirect: String,
}

impl HealthProbe {
    pub fn new(config: &HealthConfig) -> Result<Self> {
        Self::with_timeout(&config.expected_redirect, Duration::from_secs(config.timeout_secs))
    }

    pub fn with_timeout(expected_redirect: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .context("Failed to build health probe HTTP client")?;

        Ok(Self { client, expected_redirect: expected_redirect.to_string() })
    }

    /// Probe `url` once. Every outcome, including transport failures, is
    /// reported through the returned status.
    pub async fn check(&self, url: &str) -> HealthCheckResult {
        let start = Instant::now();

        match self.client.head(url).send().await {
            Ok(resp) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                let location = resp
                    .headers()
                    .get(LOCATION)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
                debug!(url, status = resp.status().as_u16(), elapsed_ms, "Health probe response");
                classify_response(url, resp.status(), location, elapsed_ms, &self.expected_redirect)
            }
            Err(e) => classify_error(url, &e),
        }
    }
}

/// Map a received response onto the tri-state status.
pub fn classify_response(
    url: &str,
    status: StatusCode,
    location: Option<String>,
    elapsed_ms: f64,
    expected_redirect: &str,
) -> HealthCheckResult {
    let response_time_ms = Some((elapsed_ms * 100.0).round() / 100.0);

    let (status, redirect_location, message) = if REDIRECT_CODES.contains(&status.as_u16()) {
        let location = location.unwrap_or_default();
        if location.contains(expected_redirect) {
            (HealthStatus::Online, Some(location), "Platform is responding correctly".to_string())
        } else {
            let message = format!("Unexpected redirect location: {}", location);
            (HealthStatus::Error, Some(location), message)
        }
    } else {
        (HealthStatus::Error, None, format!("Unexpected status code: {}", status.as_u16()))
    };

    HealthCheckResult {
        url: url.to_string(),
        status,
        redirect_location,
        response_time_ms,
        checked_at: Utc::now(),
        message,
    }
}

fn classify_error(url: &str, err: &reqwest::Error) -> HealthCheckResult {
    let (status, message) = if err.is_timeout() {
        (HealthStatus::Offline, "Connection timeout".to_string())
    } else if err.is_connect() {
        (HealthStatus::Offline, format!("Connection failed: {}", error_chain(err)))
    } else {
        (HealthStatus::Error, format!("Error: {}", error_chain(err)))
    };

    HealthCheckResult {
        url: url.to_string(),
        status,
        redirect_location: None,
        response_time_ms: None,
        checked_at: Utc::now(),
        message,
    }
}

// reqwest's Display stops at the outermost layer; the cause is further down.
fn error_chain(err: &reqwest::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
