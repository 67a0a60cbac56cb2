//! Subject and body text for outbound alerts.

use crate::types::{AlertEvent, HealthCheckResult};
use super::Notification;

const FOOTER: &str = "This is an automated alert from the host monitoring service.";

/// Alert for a probe that came back `error` or `offline`
pub fn health_alert(result: &HealthCheckResult, hostname: &str) -> Notification {
    let status = result.status.to_string().to_uppercase();
    let checked_at = result.checked_at.to_rfc3339();
    let subject = format!("Platform Alert: {}", status);

    let text = format!(
        "Platform Health Alert\n\n\
         Status: {status}\n\
         URL: {url}\n\
         Checked At: {checked_at}\n\
         Reported By: {hostname}\n\n\
         Details:\n{message}\n\n\
         {FOOTER}\n",
        url = result.url,
        message = result.message,
    );

    let rows = [
        ("Status", status.clone()),
        ("URL", format!("<a href=\"{0}\">{0}</a>", escape(&result.url))),
        ("Checked At", checked_at),
        ("Reported By", escape(hostname)),
    ];
    let html = render_html(&subject, &rows, &escape(&result.message));

    Notification { subject, text, html: Some(html), recipients: None }
}

/// Alert for one threshold breach
pub fn system_alert(event: &AlertEvent, lookback_minutes: u32, hostname: &str) -> Notification {
    let subject = format!("System Alert: {} usage on {}", event.metric, hostname);

    let text = format!(
        "System Resource Alert\n\n\
         Host: {hostname}\n\
         Metric: {metric}\n\
         Current Value: {value:.1}%\n\
         Threshold: {threshold:.1}%\n\
         Window: last {lookback_minutes} minutes\n\n\
         Details:\n{details}\n\n\
         {FOOTER}\n",
        metric = event.metric,
        value = event.value,
        threshold = event.threshold,
        details = event.details,
    );

    let rows = [
        ("Host", escape(hostname)),
        ("Metric", event.metric.to_string()),
        ("Current Value", format!("{:.1}%", event.value)),
        ("Threshold", format!("{:.1}%", event.threshold)),
        ("Window", format!("last {} minutes", lookback_minutes)),
    ];
    let html = render_html(&subject, &rows, &escape(&event.details).replace('\n', "<br>"));

    Notification { subject, text, html: Some(html), recipients: None }
}

fn render_html(title: &str, rows: &[(&str, String)], details: &str) -> String {
    let cell = "padding: 10px; border-bottom: 1px solid #eee;";
    let table: String = rows
        .iter()
        .map(|(k, v)| format!("<tr><td style=\"{cell}\"><strong>{k}:</strong></td><td style=\"{cell}\">{v}</td></tr>"))
        .collect();

    format!(
        "<html><body style=\"font-family: Arial, sans-serif; padding: 20px;\">\
         <div style=\"background-color: #f44336; color: white; padding: 15px; border-radius: 5px;\">\
         <h1 style=\"margin: 0;\">{title}</h1></div>\
         <table style=\"width: 100%; border-collapse: collapse; margin-top: 10px;\">{table}</table>\
         <div style=\"margin-top: 15px; padding: 15px; background-color: #fff3cd; border-radius: 5px;\">\
         <strong>Details:</strong><br>{details}</div>\
         <p style=\"color: #666; font-size: 12px; margin-top: 20px;\">{FOOTER}</p>\
         </body></html>",
        title = escape(title),
    )
}

pub(crate) fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
