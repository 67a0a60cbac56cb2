use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::SlackConfig;
use super::{Notification, Notifier, NotifyError};

/// Slack incoming-webhook channel
pub struct SlackChannel {
    webhook_url: String,
    channel: Option<String>,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(config: &SlackConfig) -> anyhow::Result<Self> {
        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            channel: config.channel.clone(),
            client: reqwest::Client::new(),
        })
    }

    fn payload(&self, notification: &Notification) -> Value {
        let mut payload = json!({
            "attachments": [{
                "color": "#e74c3c",
                "title": &notification.subject,
                "text": notification.text.trim(),
            }]
        });

        if let Some(ref ch) = self.channel {
            payload["channel"] = json!(ch);
        }
        payload
    }
}

#[async_trait]
impl Notifier for SlackChannel {
    fn name(&self) -> &str { "slack" }

    async fn send(&self, notification: &Notification) -> Result<String, NotifyError> {
        if notification.subject.trim().is_empty() {
            return Err(NotifyError::EmptyContent("subject"));
        }

        self.client.post(&self.webhook_url)
            .json(&self.payload(notification))
            .send()
            .await?
            .error_for_status()?;

        // Incoming webhooks answer with a bare "ok"
        Ok("sent".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_subject_and_channel() {
        let slack = SlackChannel::new(&SlackConfig {
            enabled: true,
            webhook_url: "https://hooks.slack.invalid/T000".into(),
            channel: Some("#ops".into()),
        })
        .unwrap();
        let payload = slack.payload(&Notification {
            subject: "System Alert: CPU".into(),
            text: "\nAverage CPU usage: 97.0%\n".into(),
            html: None,
            recipients: None,
        });

        assert_eq!(payload["channel"], "#ops");
        assert_eq!(payload["attachments"][0]["title"], "System Alert: CPU");
        assert_eq!(payload["attachments"][0]["text"], "Average CPU usage: 97.0%");
    }
}
