use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use super::Notifier;
use crate::store::Alert;

/// Posts newly created alerts to a Slack incoming webhook. Single attempt,
/// bounded by the request timeout.
pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
}

impl SlackNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            webhook_url: url.into(),
            client: Client::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Slack message text. Carries no student-identifying detail beyond the id
/// staff need to open the record.
pub fn format_alert(alert: &Alert) -> String {
    let due = alert
        .due_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "*{severity} {kind} alert:* {title}\nStudent: `{student}`\n{message}\nFollow up by: {due}",
        severity = alert.severity.as_str().to_uppercase(),
        kind = alert.alert_type,
        title = alert.title,
        student = alert.student_id,
        message = alert.message,
    )
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    fn channel(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let body = serde_json::json!({ "text": format_alert(alert) });

        self.client
            .post(&self.webhook_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .context("slack post")?
            .error_for_status()
            .context("slack non-2xx")?;
        Ok(())
    }
}
