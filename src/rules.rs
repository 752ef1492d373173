//! Waste and risk rules.
//!
//! Rules are pure and side-effect free. Evaluation is deterministic and
//! commutative: any permutation of the ruleset yields the same finding set.
//! Per-descriptor rules look at one resource; account rules look at the
//! whole descriptor set (quota totals).

use crate::types::{AttachmentState, Finding, ResourceDescriptor, ResourceType, Severity};
use chrono::{DateTime, Duration, Utc};

/// Externally supplied thresholds referenced by numeric rules
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Free-tier volume capacity in GB; `usage > threshold` triggers,
    /// equality does not
    pub free_tier_volume_gb: u64,
    /// How long a resource may sit unattached before it counts as idle
    pub idle_after: Duration,
}

/// A rule evaluated against a single resource descriptor
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn applies_to(&self) -> &'static [ResourceType];
    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding>;
}

/// A rule evaluated once per run over every scanned descriptor
pub trait AccountRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(
        &self,
        descriptors: &[ResourceDescriptor],
        quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding>;
}

fn finding(
    resource_id: impl Into<String>,
    rule_name: &str,
    severity: Severity,
    message: String,
    now: DateTime<Utc>,
) -> Finding {
    Finding {
        resource_id: resource_id.into(),
        rule_name: rule_name.to_string(),
        severity,
        message,
        discovered_at: now,
    }
}

/// A volume not attached to any instance is pure spend
pub struct UnattachedVolume;

impl Rule for UnattachedVolume {
    fn name(&self) -> &'static str {
        "unattached-volume"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::Volume]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if !descriptor.is_unattached() {
            return None;
        }
        let size = descriptor
            .capacity_gb
            .map(|gb| format!(" ({} GiB)", gb))
            .unwrap_or_default();
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Warn,
            format!("volume {}{} is not attached to any workload", descriptor.id, size),
            now,
        ))
    }
}

/// An allocated address with no association still bills hourly
pub struct OrphanedAddress;

impl Rule for OrphanedAddress {
    fn name(&self) -> &'static str {
        "orphaned-address"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::Address]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if !descriptor.is_unattached() {
            return None;
        }
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Warn,
            format!("address {} is allocated but not associated", descriptor.id),
            now,
        ))
    }
}

/// NAT-style gateways bill by the hour from the moment they exist,
/// attached or not; the single most expensive surprise in small accounts
pub struct ActiveGateway;

impl Rule for ActiveGateway {
    fn name(&self) -> &'static str {
        "active-gateway"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::Gateway]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Critical,
            format!(
                "gateway {} in {} is billable while provisioned",
                descriptor.id, descriptor.region
            ),
            now,
        ))
    }
}

/// Anything that has been unattached longer than the idle threshold
pub struct IdleResource;

impl Rule for IdleResource {
    fn name(&self) -> &'static str {
        "idle-resource"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[
            ResourceType::Volume,
            ResourceType::Address,
            ResourceType::LoadBalancer,
            ResourceType::Database,
        ]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if descriptor.attachment != AttachmentState::Unattached {
            return None;
        }
        let age = now - descriptor.created_at;
        if age <= quota.idle_after {
            return None;
        }
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Warn,
            format!(
                "{} {} has been unattached for {} hours (threshold {})",
                descriptor.resource_type,
                descriptor.id,
                age.num_hours(),
                quota.idle_after.num_hours()
            ),
            now,
        ))
    }
}

/// Load balancers and database instances bill hourly from creation;
/// every one deserves a look in a free-tier account
pub struct BillableResource;

impl Rule for BillableResource {
    fn name(&self) -> &'static str {
        "billable-resource"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::LoadBalancer, ResourceType::Database]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Warn,
            format!(
                "{} {} in {} is billable while provisioned",
                descriptor.resource_type, descriptor.id, descriptor.region
            ),
            now,
        ))
    }
}

/// A log group with no retention policy accretes storage spend forever
pub struct LogGroupNoRetention;

impl Rule for LogGroupNoRetention {
    fn name(&self) -> &'static str {
        "log-group-no-retention"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::LogGroup]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if descriptor.has_retention_policy() {
            return None;
        }
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Warn,
            format!(
                "log group {} has no retention policy and grows unbounded",
                descriptor.id
            ),
            now,
        ))
    }
}

/// A bucket readable by everyone is the risk half of the ruleset
pub struct PublicBucket;

impl Rule for PublicBucket {
    fn name(&self) -> &'static str {
        "public-bucket"
    }

    fn applies_to(&self) -> &'static [ResourceType] {
        &[ResourceType::Bucket]
    }

    fn evaluate(
        &self,
        descriptor: &ResourceDescriptor,
        _quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if !descriptor.is_publicly_readable() {
            return None;
        }
        Some(finding(
            &descriptor.id,
            self.name(),
            Severity::Critical,
            format!("bucket {} grants public read access", descriptor.id),
            now,
        ))
    }
}

/// Total unattached volume capacity exceeding the free-tier allowance.
/// Boundary is strict-exceeds: a total equal to the threshold is free.
pub struct FreeTierVolumeQuota;

impl AccountRule for FreeTierVolumeQuota {
    fn name(&self) -> &'static str {
        "free-tier-volume-quota"
    }

    fn evaluate(
        &self,
        descriptors: &[ResourceDescriptor],
        quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        let total_gb: u64 = descriptors
            .iter()
            .filter(|d| d.resource_type == ResourceType::Volume && d.is_unattached())
            .filter_map(|d| d.capacity_gb)
            .sum();

        if total_gb <= quota.free_tier_volume_gb {
            return None;
        }
        Some(finding(
            "account:volume-capacity",
            self.name(),
            Severity::Critical,
            format!(
                "unattached volume capacity {} GiB exceeds free-tier allowance of {} GiB",
                total_gb, quota.free_tier_volume_gb
            ),
            now,
        ))
    }
}

/// The full ruleset evaluated each run
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
    account_rules: Vec<Box<dyn AccountRule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn Rule>>, account_rules: Vec<Box<dyn AccountRule>>) -> Self {
        Self {
            rules,
            account_rules,
        }
    }

    /// The built-in ruleset from the reference deployment
    pub fn with_default_rules() -> Self {
        Self::new(
            vec![
                Box::new(UnattachedVolume),
                Box::new(OrphanedAddress),
                Box::new(ActiveGateway),
                Box::new(IdleResource),
                Box::new(BillableResource),
                Box::new(LogGroupNoRetention),
                Box::new(PublicBucket),
            ],
            vec![Box::new(FreeTierVolumeQuota)],
        )
    }

    /// Evaluate every applicable rule against every descriptor, then the
    /// account rules over the whole set. A descriptor failing multiple
    /// rules yields one finding per rule.
    pub fn evaluate(
        &self,
        descriptors: &[ResourceDescriptor],
        quota: &QuotaConfig,
        now: DateTime<Utc>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        for descriptor in descriptors {
            for rule in &self.rules {
                if !rule.applies_to().contains(&descriptor.resource_type) {
                    continue;
                }
                if let Some(f) = rule.evaluate(descriptor, quota, now) {
                    findings.push(f);
                }
            }
        }

        for rule in &self.account_rules {
            if let Some(f) = rule.evaluate(descriptors, quota, now) {
                findings.push(f);
            }
        }

        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashSet};

    fn quota() -> QuotaConfig {
        QuotaConfig {
            free_tier_volume_gb: 30,
            idle_after: Duration::hours(168),
        }
    }

    fn descriptor(
        id: &str,
        resource_type: ResourceType,
        attachment: AttachmentState,
        capacity_gb: Option<u64>,
        age_hours: i64,
        now: DateTime<Utc>,
    ) -> ResourceDescriptor {
        ResourceDescriptor {
            id: id.to_string(),
            resource_type,
            region: "us-east-1".to_string(),
            created_at: now - Duration::hours(age_hours),
            attachment,
            tags: BTreeMap::new(),
            capacity_gb,
        }
    }

    fn key_set(findings: &[Finding]) -> HashSet<(String, String)> {
        findings
            .iter()
            .map(|f| (f.resource_id.clone(), f.rule_name.clone()))
            .collect()
    }

    #[test]
    fn test_rule_order_does_not_affect_output() {
        let now = Utc::now();
        let descriptors = vec![
            descriptor("vol-1", ResourceType::Volume, AttachmentState::Unattached, Some(40), 200, now),
            descriptor("eip-1", ResourceType::Address, AttachmentState::Unattached, None, 10, now),
            descriptor("nat-1", ResourceType::Gateway, AttachmentState::Attached, None, 5, now),
        ];

        let forward = RuleEngine::new(
            vec![
                Box::new(UnattachedVolume),
                Box::new(OrphanedAddress),
                Box::new(ActiveGateway),
                Box::new(IdleResource),
            ],
            vec![Box::new(FreeTierVolumeQuota)],
        );
        let reversed = RuleEngine::new(
            vec![
                Box::new(IdleResource),
                Box::new(ActiveGateway),
                Box::new(OrphanedAddress),
                Box::new(UnattachedVolume),
            ],
            vec![Box::new(FreeTierVolumeQuota)],
        );

        let a = forward.evaluate(&descriptors, &quota(), now);
        let b = reversed.evaluate(&descriptors, &quota(), now);
        assert_eq!(key_set(&a), key_set(&b));
    }

    #[test]
    fn test_descriptor_failing_multiple_rules_yields_multiple_findings() {
        let now = Utc::now();
        // Unattached for 200h: trips both unattached-volume and idle-resource
        let descriptors = vec![descriptor(
            "vol-1",
            ResourceType::Volume,
            AttachmentState::Unattached,
            Some(10),
            200,
            now,
        )];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        let keys = key_set(&findings);
        assert!(keys.contains(&("vol-1".to_string(), "unattached-volume".to_string())));
        assert!(keys.contains(&("vol-1".to_string(), "idle-resource".to_string())));
    }

    #[test]
    fn test_quota_rule_fires_above_threshold() {
        let now = Utc::now();
        let descriptors = vec![
            descriptor("vol-1", ResourceType::Volume, AttachmentState::Unattached, Some(20), 1, now),
            descriptor("vol-2", ResourceType::Volume, AttachmentState::Unattached, Some(15), 1, now),
        ];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        let quota_findings: Vec<_> = findings
            .iter()
            .filter(|f| f.rule_name == "free-tier-volume-quota")
            .collect();

        assert_eq!(quota_findings.len(), 1);
        assert_eq!(quota_findings[0].severity, Severity::Critical);
        assert_eq!(quota_findings[0].resource_id, "account:volume-capacity");
    }

    #[test]
    fn test_quota_rule_silent_at_exact_threshold() {
        let now = Utc::now();
        // 30 GiB total against a 30 GiB allowance: strict-exceeds, no finding
        let descriptors = vec![
            descriptor("vol-1", ResourceType::Volume, AttachmentState::Unattached, Some(30), 1, now),
        ];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        assert!(!findings
            .iter()
            .any(|f| f.rule_name == "free-tier-volume-quota"));
    }

    #[test]
    fn test_attached_volumes_do_not_count_toward_quota() {
        let now = Utc::now();
        let descriptors = vec![
            descriptor("vol-1", ResourceType::Volume, AttachmentState::Attached, Some(100), 1, now),
            descriptor("vol-2", ResourceType::Volume, AttachmentState::Unattached, Some(5), 1, now),
        ];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        assert!(!findings
            .iter()
            .any(|f| f.rule_name == "free-tier-volume-quota"));
    }

    #[test]
    fn test_gateway_always_flagged_critical() {
        let now = Utc::now();
        let descriptors = vec![descriptor(
            "nat-1",
            ResourceType::Gateway,
            AttachmentState::Attached,
            None,
            1,
            now,
        )];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_name, "active-gateway");
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn test_log_group_without_retention_flagged() {
        let now = Utc::now();
        let mut with_policy = descriptor(
            "lg-1",
            ResourceType::LogGroup,
            AttachmentState::Unknown,
            None,
            10,
            now,
        );
        with_policy
            .tags
            .insert("retention_days".to_string(), "30".to_string());
        let without_policy = descriptor(
            "lg-2",
            ResourceType::LogGroup,
            AttachmentState::Unknown,
            None,
            10,
            now,
        );

        let engine = RuleEngine::with_default_rules();
        let findings = engine.evaluate(&[with_policy, without_policy], &quota(), now);

        let flagged: Vec<_> = findings
            .iter()
            .filter(|f| f.rule_name == "log-group-no-retention")
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].resource_id, "lg-2");
    }

    #[test]
    fn test_public_bucket_flagged_critical() {
        let now = Utc::now();
        let mut public = descriptor(
            "bkt-1",
            ResourceType::Bucket,
            AttachmentState::Unknown,
            None,
            10,
            now,
        );
        public
            .tags
            .insert("public_access".to_string(), "true".to_string());
        let private = descriptor(
            "bkt-2",
            ResourceType::Bucket,
            AttachmentState::Unknown,
            None,
            10,
            now,
        );

        let engine = RuleEngine::with_default_rules();
        let findings = engine.evaluate(&[public, private], &quota(), now);

        let flagged: Vec<_> = findings
            .iter()
            .filter(|f| f.rule_name == "public-bucket")
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].resource_id, "bkt-1");
        assert_eq!(flagged[0].severity, Severity::Critical);
    }

    #[test]
    fn test_load_balancers_and_databases_always_billable() {
        let now = Utc::now();
        let descriptors = vec![
            descriptor("lb-1", ResourceType::LoadBalancer, AttachmentState::Attached, None, 10, now),
            descriptor("db-1", ResourceType::Database, AttachmentState::Attached, None, 10, now),
        ];

        let findings = RuleEngine::with_default_rules().evaluate(&descriptors, &quota(), now);
        let keys = key_set(&findings);
        assert!(keys.contains(&("lb-1".to_string(), "billable-resource".to_string())));
        assert!(keys.contains(&("db-1".to_string(), "billable-resource".to_string())));
    }

    #[test]
    fn test_idle_rule_respects_threshold() {
        let now = Utc::now();
        let fresh = vec![descriptor(
            "eip-1",
            ResourceType::Address,
            AttachmentState::Unattached,
            None,
            100,
            now,
        )];
        let stale = vec![descriptor(
            "eip-2",
            ResourceType::Address,
            AttachmentState::Unattached,
            None,
            200,
            now,
        )];

        let engine = RuleEngine::with_default_rules();
        let fresh_findings = engine.evaluate(&fresh, &quota(), now);
        let stale_findings = engine.evaluate(&stale, &quota(), now);

        assert!(!fresh_findings.iter().any(|f| f.rule_name == "idle-resource"));
        assert!(stale_findings.iter().any(|f| f.rule_name == "idle-resource"));
    }
}
