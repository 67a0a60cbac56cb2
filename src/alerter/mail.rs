use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::MailRelayConfig;
use super::message::escape;
use super::{Notification, Notifier, NotifyError};

/// Email delivery through an HTTP mail relay
pub struct MailRelayChannel {
    url: String,
    api_key: Option<String>,
    sender: Option<String>,
    recipients: Vec<String>,
    client: reqwest::Client,
}

impl MailRelayChannel {
    pub fn new(config: &MailRelayConfig) -> anyhow::Result<Self> {
        Ok(Self {
            url: config.url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            sender: config.sender.clone().filter(|s| !s.trim().is_empty()),
            recipients: clean_recipients(&config.recipients),
            client: reqwest::Client::new(),
        })
    }

    /// Validate and build the relay request body
    fn payload(&self, notification: &Notification) -> Result<Value, NotifyError> {
        let sender = self.sender.as_ref().ok_or(NotifyError::MissingSender)?;

        let recipients = match notification.recipients {
            Some(ref r) if !r.is_empty() => clean_recipients(r),
            _ => self.recipients.clone(),
        };
        if recipients.is_empty() {
            return Err(NotifyError::MissingRecipients);
        }

        if notification.subject.trim().is_empty() {
            return Err(NotifyError::EmptyContent("subject"));
        }
        if notification.text.trim().is_empty() {
            return Err(NotifyError::EmptyContent("text body"));
        }

        let html = notification
            .html
            .clone()
            .unwrap_or_else(|| format!("<html><body><p>{}</p></body></html>", escape(&notification.text)));

        Ok(json!({
            "senderAddress": sender,
            "recipients": {
                "to": recipients.iter().map(|a| json!({ "address": a })).collect::<Vec<_>>(),
            },
            "content": {
                "subject": &notification.subject,
                "plainText": &notification.text,
                "html": html,
            },
        }))
    }
}

fn clean_recipients(list: &[String]) -> Vec<String> {
    list.iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// The relay reports the id as `id` or `message_id`; older relays send nothing.
fn message_id(body: &Value) -> String {
    body.get("id")
        .or_else(|| body.get("message_id"))
        .and_then(Value::as_str)
        .unwrap_or("sent")
        .to_string()
}

#[async_trait]
impl Notifier for MailRelayChannel {
    fn name(&self) -> &str { "mail" }

    async fn send(&self, notification: &Notification) -> Result<String, NotifyError> {
        let payload = self.payload(notification)?;

        let mut req = self.client.post(&self.url).json(&payload);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?.error_for_status()?;
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        Ok(message_id(&body))
    }
}
