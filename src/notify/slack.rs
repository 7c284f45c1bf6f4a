//! Slack notification support via Incoming Webhooks.

use anyhow::Result;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Notifier, UpgradeEvent, build_message};
use crate::error::CuoError;

/// Structured Slack message for Block Kit rendering.
pub struct SlackMessage {
    pub header: String,
    pub fields: Vec<(String, String)>,
    pub context: String,
}

/// Slack webhook client.
pub struct SlackNotifier {
    webhook_url: SecretString,
    client: reqwest::Client,
}

impl SlackNotifier {
    /// Create a new Slack notifier with the given webhook URL.
    pub fn new(webhook_url: SecretString) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a Block Kit message to Slack.
    pub async fn send(&self, resource_name: &str, message: &SlackMessage) -> Result<()> {
        let payload = build_blocks_payload(message);
        let resp = self
            .client
            .post(self.webhook_url.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| CuoError::Notification(format!("Slack request failed: {e}")))?;

        if !resp.status().is_success() {
            warn!(
                resource = resource_name,
                status = %resp.status(),
                "Slack webhook returned non-success status"
            );
            return Err(CuoError::Notification(format!(
                "Slack webhook returned {}",
                resp.status()
            ))
            .into());
        }

        info!(
            resource = resource_name,
            header = message.header.as_str(),
            "Slack notification sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, event: &UpgradeEvent) -> Result<()> {
        self.send(&event.upgradeconfig, &build_message(event)).await
    }
}

/// Build a Slack Block Kit payload from a [`SlackMessage`].
fn build_blocks_payload(message: &SlackMessage) -> Value {
    let mut blocks: Vec<Value> = Vec::new();

    // Header block
    blocks.push(json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": message.header,
            "emoji": true
        }
    }));

    // Section with fields (pairs of label/value as mrkdwn)
    if !message.fields.is_empty() {
        let fields: Vec<Value> = message
            .fields
            .iter()
            .map(|(label, value)| {
                json!({
                    "type": "mrkdwn",
                    "text": format!("*{label}*\n{value}")
                })
            })
            .collect();

        // Slack allows max 10 fields per section; split if needed
        for chunk in fields.chunks(10) {
            blocks.push(json!({
                "type": "section",
                "fields": chunk
            }));
        }
    }

    // Divider
    blocks.push(json!({"type": "divider"}));

    // Context block
    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": message.context
        }]
    }));

    // Fallback text for clients that don't support blocks
    let fallback = format!("{}\n{}", message.header, message.context);

    json!({
        "text": fallback,
        "blocks": blocks
    })
}
