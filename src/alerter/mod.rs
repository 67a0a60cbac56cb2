pub mod mail;
pub mod message;
pub mod slack;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::config::AlertingConfig;

/// Content of one outbound alert
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub subject: String,
    pub text: String,
    pub html: Option<String>,
    /// Replaces the channel's configured recipients when set
    pub recipients: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("sender address is not configured")]
    MissingSender,
    #[error("no notification recipients configured")]
    MissingRecipients,
    #[error("{0} must be a non-empty string")]
    EmptyContent(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Trait for alert delivery channels
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name
    fn name(&self) -> &str;

    /// Deliver one notification and return the provider's message id
    async fn send(&self, notification: &Notification) -> Result<String, NotifyError>;
}

/// Fans a notification out to every enabled channel.
///
/// Delivery is attempted once per channel. Failures are logged and never
/// retried.
pub struct AlertManager {
    channels: Vec<Box<dyn Notifier>>,
}

impl AlertManager {
    pub fn new(config: &AlertingConfig) -> anyhow::Result<Self> {
        let mut channels: Vec<Box<dyn Notifier>> = Vec::new();

        if let Some(ref mc) = config.mail {
            if mc.enabled {
                channels.push(Box::new(mail::MailRelayChannel::new(mc)?));
            }
        }

        if let Some(ref sc) = config.slack {
            if sc.enabled {
                channels.push(Box::new(slack::SlackChannel::new(sc)?));
            }
        }

        info!(channels = channels.len(), "Initialized alert channels");
        Ok(Self::with_channels(channels))
    }

    pub fn with_channels(channels: Vec<Box<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Returns how many channels accepted the notification.
    pub async fn dispatch(&self, notification: &Notification) -> usize {
        if self.channels.is_empty() {
            warn!(subject = %notification.subject, "No alert channels configured, alert dropped");
            return 0;
        }

        let mut delivered = 0;
        for channel in &self.channels {
            match channel.send(notification).await {
                Ok(message_id) => {
                    info!(channel = channel.name(), message_id = %message_id, "Alert sent");
                    delivered += 1;
                }
                Err(e) => {
                    error!(channel = channel.name(), error = %e, "Failed to send alert");
                }
            }
        }
        delivered
    }
}
