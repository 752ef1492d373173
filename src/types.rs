//! Core domain types for resource scanning and findings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Kind of billable resource the scanner understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Volume,
    Address,
    Gateway,
    LoadBalancer,
    Database,
    LogGroup,
    Bucket,
}

impl ResourceType {
    /// All resource types scanned by default
    pub fn all() -> Vec<ResourceType> {
        vec![
            ResourceType::Volume,
            ResourceType::Address,
            ResourceType::Gateway,
            ResourceType::LoadBalancer,
            ResourceType::Database,
            ResourceType::LogGroup,
            ResourceType::Bucket,
        ]
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Volume => write!(f, "volume"),
            ResourceType::Address => write!(f, "address"),
            ResourceType::Gateway => write!(f, "gateway"),
            ResourceType::LoadBalancer => write!(f, "load_balancer"),
            ResourceType::Database => write!(f, "database"),
            ResourceType::LogGroup => write!(f, "log_group"),
            ResourceType::Bucket => write!(f, "bucket"),
        }
    }
}

/// Whether a resource is serving an active workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Attached,
    Unattached,
    Unknown,
}

/// Immutable snapshot of one scanned resource at scan time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Provider-assigned resource identifier
    pub id: String,
    pub resource_type: ResourceType,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub attachment: AttachmentState,
    /// User tags plus provider-normalized attributes the listing API
    /// surfaces (`retention_days` on log groups, `public_access` on buckets)
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Size in GB for capacity-billed resources (volumes, databases)
    #[serde(default)]
    pub capacity_gb: Option<u64>,
}

impl ResourceDescriptor {
    pub fn is_unattached(&self) -> bool {
        self.attachment == AttachmentState::Unattached
    }

    /// Whether a log group carries any retention policy
    pub fn has_retention_policy(&self) -> bool {
        self.tags.contains_key("retention_days")
    }

    /// Whether a bucket grants read access to everyone
    pub fn is_publicly_readable(&self) -> bool {
        self.tags.get("public_access").map(String::as_str) == Some("true")
    }
}

/// Severity of a finding, ordered lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single rule violation detected for one resource in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub resource_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub discovered_at: DateTime<Utc>,
}

impl Finding {
    /// Key used to suppress repeat notifications across runs
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            resource_id: self.resource_id.clone(),
            rule_name: self.rule_name.clone(),
        }
    }
}

/// (resource, rule) pair identifying a repeatable finding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub resource_id: String,
    pub rule_name: String,
}

/// Record of one completed scan run, appended to the run history store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Every finding the run produced, suppressed or not
    pub findings: Vec<Finding>,
    /// Keys that were actually notified this run; dedup-window lookups
    /// consult these, so a suppressed finding never extends its own window
    pub notified: Vec<DedupKey>,
}

/// Payload handed to the notification channels; ephemeral, never persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub summary: String,
    pub severity: Severity,
    pub findings: Vec<Finding>,
    pub channel_targets: Vec<String>,
}

/// Outcome of one channel delivery attempt sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub channel: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything that happened during one run; failures are recorded here,
/// never silently swallowed
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub descriptors_scanned: usize,
    pub findings_total: usize,
    pub findings_included: usize,
    pub findings_suppressed: usize,
    pub inventory_errors: Vec<String>,
    pub history_errors: Vec<String>,
    pub deliveries: Vec<DeliveryResult>,
    pub dispatched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(resource_id: &str, rule_name: &str) -> Finding {
        Finding {
            resource_id: resource_id.to_string(),
            rule_name: rule_name.to_string(),
            severity: Severity::Warn,
            message: String::new(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_dedup_key_identity() {
        let a = finding("vol-1", "unattached-volume");
        let b = finding("vol-1", "unattached-volume");
        let c = finding("vol-2", "unattached-volume");

        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warn);
        assert!(Severity::Warn > Severity::Info);
        assert_eq!(
            [Severity::Warn, Severity::Critical, Severity::Info]
                .into_iter()
                .max(),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn test_resource_type_serde_names() {
        let json = serde_json::to_string(&ResourceType::LoadBalancer).unwrap();
        assert_eq!(json, "\"load_balancer\"");
    }
}
