//! Hunter configuration.
//!
//! An explicit config struct passed into the orchestrator at construction,
//! never read from ambient process state after startup. Validation happens
//! once, before the first run is allowed to start.

use crate::error::ConfigError;
use crate::rules::QuotaConfig;
use crate::types::ResourceType;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;

/// Which webhook envelope a channel speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Discord,
    Slack,
    Webhook,
}

/// One configured notification target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub kind: ChannelKind,
    pub webhook_url: String,
}

/// Inventory API connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after the first, on transient failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// Channel delivery retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Top-level hunter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HunterConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "ResourceType::all")]
    pub resource_types: Vec<ResourceType>,
    /// Free-tier volume capacity in GB; strict-exceeds triggers the quota rule
    #[serde(default = "default_free_tier_volume_gb")]
    pub free_tier_volume_gb: u64,
    /// Hours a resource may sit unattached before the idle rule fires
    #[serde(default = "default_idle_after_hours")]
    pub idle_after_hours: i64,
    /// Minimum hours between repeat notifications for the same (resource, rule)
    #[serde(default = "default_cool_down_hours")]
    pub cool_down_hours: i64,
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_free_tier_volume_gb() -> u64 {
    30
}

fn default_idle_after_hours() -> i64 {
    168
}

fn default_cool_down_hours() -> i64 {
    24
}

impl HunterConfig {
    /// Load from a JSON config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Unparseable {
            path: path.display().to_string(),
            source,
        })
    }

    /// Build a config from environment variables, mirroring the reference
    /// deployment's lambda environment (HOME_REGION, MAX_FREE_EBS_GB,
    /// DISCORD_WEBHOOK_URL, SLACK_WEBHOOK_URL, WEBHOOK_URL).
    pub fn from_env() -> Self {
        let mut channels = Vec::new();
        if let Ok(url) = env::var("DISCORD_WEBHOOK_URL") {
            if !url.is_empty() {
                channels.push(ChannelConfig {
                    name: "discord".to_string(),
                    kind: ChannelKind::Discord,
                    webhook_url: url,
                });
            }
        }
        if let Ok(url) = env::var("SLACK_WEBHOOK_URL") {
            if !url.is_empty() {
                channels.push(ChannelConfig {
                    name: "slack".to_string(),
                    kind: ChannelKind::Slack,
                    webhook_url: url,
                });
            }
        }
        if let Ok(url) = env::var("WEBHOOK_URL") {
            if !url.is_empty() {
                channels.push(ChannelConfig {
                    name: "webhook".to_string(),
                    kind: ChannelKind::Webhook,
                    webhook_url: url,
                });
            }
        }

        let free_tier_volume_gb = env::var("MAX_FREE_EBS_GB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_free_tier_volume_gb);

        Self {
            region: env::var("HOME_REGION").unwrap_or_else(|_| default_region()),
            resource_types: ResourceType::all(),
            free_tier_volume_gb,
            idle_after_hours: default_idle_after_hours(),
            cool_down_hours: default_cool_down_hours(),
            inventory: InventoryConfig {
                base_url: env::var("INVENTORY_API_URL")
                    .unwrap_or_else(|_| "http://localhost:8080".to_string()),
                api_token: env::var("INVENTORY_API_TOKEN").ok().filter(|t| !t.is_empty()),
                timeout_secs: default_timeout_secs(),
                max_retries: default_max_retries(),
            },
            channels,
            delivery: DeliveryConfig::default(),
        }
    }

    /// Validate everything that would otherwise fail mid-run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resource_types.is_empty() {
            return Err(ConfigError::NoResourceTypes);
        }
        if self.cool_down_hours <= 0 {
            return Err(ConfigError::InvalidCoolDown(self.cool_down_hours));
        }
        if self.idle_after_hours <= 0 {
            return Err(ConfigError::InvalidIdleThreshold(self.idle_after_hours));
        }
        if self.inventory.timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }
        if !is_http_url(&self.inventory.base_url) {
            return Err(ConfigError::InvalidInventoryUrl(
                self.inventory.base_url.clone(),
            ));
        }
        if self.delivery.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !is_http_url(&channel.webhook_url) {
                return Err(ConfigError::InvalidWebhookUrl(channel.name.clone()));
            }
            if !seen.insert(channel.name.as_str()) {
                return Err(ConfigError::DuplicateChannel(channel.name.clone()));
            }
        }
        Ok(())
    }

    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            free_tier_volume_gb: self.free_tier_volume_gb,
            idle_after: Duration::hours(self.idle_after_hours),
        }
    }

    pub fn cool_down(&self) -> Duration {
        Duration::hours(self.cool_down_hours)
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
