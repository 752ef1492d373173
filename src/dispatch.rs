//! Notification fan-out.
//!
//! One `NotificationChannel` implementation per target, selected by
//! configuration at construction. Channel deliveries run independently:
//! failure on one never blocks or rolls back another, and every failure
//! surfaces in the run summary after bounded retry.

use crate::config::{ChannelConfig, ChannelKind, DeliveryConfig};
use crate::error::DeliveryError;
use crate::types::{DeliveryResult, DeliveryStatus, NotificationPayload};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info, warn};

/// Discord caps message content at 2000 characters
const DISCORD_CONTENT_LIMIT: usize = 1900;

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError>;
}

async fn post_json(
    client: &Client,
    webhook_url: &str,
    body: &serde_json::Value,
) -> Result<(), DeliveryError> {
    let response = client.post(webhook_url).json(body).send().await?;
    if !response.status().is_success() {
        return Err(DeliveryError::Rejected {
            status: response.status().as_u16(),
        });
    }
    Ok(())
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut clipped: String = text.chars().take(max_chars).collect();
        clipped.push_str("\n…");
        clipped
    }
}

/// Discord webhook: `{"content": ...}` envelope
pub struct DiscordChannel {
    name: String,
    client: Client,
    webhook_url: String,
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "content": clip(&payload.summary, DISCORD_CONTENT_LIMIT),
        });
        post_json(&self.client, &self.webhook_url, &body).await
    }
}

/// Slack incoming webhook: `{"text": ...}` envelope
pub struct SlackChannel {
    name: String,
    client: Client,
    webhook_url: String,
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "text": payload.summary,
        });
        post_json(&self.client, &self.webhook_url, &body).await
    }
}

/// Generic webhook: posts the full structured payload
pub struct WebhookChannel {
    name: String,
    client: Client,
    webhook_url: String,
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, payload: &NotificationPayload) -> Result<(), DeliveryError> {
        let body = serde_json::to_value(payload)?;
        post_json(&self.client, &self.webhook_url, &body).await
    }
}

/// Build one channel per configured target
pub fn build_channels(
    configs: &[ChannelConfig],
    timeout: Duration,
) -> anyhow::Result<Vec<Box<dyn NotificationChannel>>> {
    use anyhow::Context;

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client for notification channels")?;

    let channels = configs
        .iter()
        .map(|cfg| -> Box<dyn NotificationChannel> {
            match cfg.kind {
                ChannelKind::Discord => Box::new(DiscordChannel {
                    name: cfg.name.clone(),
                    client: client.clone(),
                    webhook_url: cfg.webhook_url.clone(),
                }),
                ChannelKind::Slack => Box::new(SlackChannel {
                    name: cfg.name.clone(),
                    client: client.clone(),
                    webhook_url: cfg.webhook_url.clone(),
                }),
                ChannelKind::Webhook => Box::new(WebhookChannel {
                    name: cfg.name.clone(),
                    client: client.clone(),
                    webhook_url: cfg.webhook_url.clone(),
                }),
            }
        })
        .collect();
    Ok(channels)
}

/// Delivers payloads to every channel with bounded retry and backoff
pub struct NotificationDispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl NotificationDispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>, delivery: &DeliveryConfig) -> Self {
        Self {
            channels,
            max_attempts: delivery.max_attempts.max(1),
            backoff_base: Duration::from_millis(delivery.backoff_base_ms),
        }
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// Attempt delivery on every channel concurrently. Each channel gets its
    /// own retry sequence; a failed channel is recorded, never raised.
    pub async fn dispatch(&self, payload: &NotificationPayload) -> Vec<DeliveryResult> {
        let attempts = self
            .channels
            .iter()
            .map(|channel| self.deliver_with_retry(channel.as_ref(), payload));
        futures::future::join_all(attempts).await
    }

    async fn deliver_with_retry(
        &self,
        channel: &dyn NotificationChannel,
        payload: &NotificationPayload,
    ) -> DeliveryResult {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            match channel.deliver(payload).await {
                Ok(()) => {
                    info!(channel = channel.name(), attempts = attempt, "Delivered payload");
                    return DeliveryResult {
                        channel: channel.name().to_string(),
                        status: DeliveryStatus::Delivered,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    if attempt < self.max_attempts {
                        // Exponential backoff: base, 2x, 4x, ...
                        let backoff = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                        warn!(
                            channel = channel.name(),
                            attempt = attempt,
                            error = %e,
                            "Delivery failed, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = Some(e.to_string());
                }
            }
        }

        error!(
            channel = channel.name(),
            attempts = self.max_attempts,
            "Delivery failed after all attempts"
        );
        DeliveryResult {
            channel: channel.name().to_string(),
            status: DeliveryStatus::Failed,
            attempts: self.max_attempts,
            error: last_error,
        }
    }
}
