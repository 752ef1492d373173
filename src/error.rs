//! Error taxonomy for the hunter.
//!
//! Component-local errors are contained at their boundary whenever downstream
//! work is still meaningful; only `ConfigError` halts a run before it starts.

use crate::types::ResourceType;
use thiserror::Error;

/// Errors from the cloud inventory boundary
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Transient provider failure (timeout, 5xx); retried within the run
    #[error("provider unavailable listing {resource_type}: {message}")]
    ProviderUnavailable {
        resource_type: ResourceType,
        message: String,
    },

    /// Fatal for this resource type only; the scan continues for other types
    #[error("permission denied listing {resource_type}: {message}")]
    PermissionDenied {
        resource_type: ResourceType,
        message: String,
    },
}

impl InventoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::ProviderUnavailable { .. })
    }
}

/// Errors from a notification channel delivery attempt
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {status}")]
    Rejected { status: u16 },

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Startup-time configuration errors; the only failures that prevent a run
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no resource types configured to scan")]
    NoResourceTypes,

    #[error("cool-down window must be positive, got {0} hours")]
    InvalidCoolDown(i64),

    #[error("idle threshold must be positive, got {0} hours")]
    InvalidIdleThreshold(i64),

    #[error("inventory base URL is not a valid http(s) URL: {0}")]
    InvalidInventoryUrl(String),

    #[error("inventory timeout must be positive")]
    InvalidTimeout,

    #[error("delivery max attempts must be at least 1")]
    InvalidMaxAttempts,

    #[error("channel '{0}' has an invalid webhook URL")]
    InvalidWebhookUrl(String),

    #[error("duplicate channel name '{0}'")]
    DuplicateChannel(String),

    #[error("failed to read config file {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Unparseable {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the run-history store
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt history record: {0}")]
    Corrupt(#[from] serde_json::Error),
}
