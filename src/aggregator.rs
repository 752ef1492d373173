//! Finding aggregation and dedup.
//!
//! Deduplicates findings within the run and against the dedup keys notified
//! inside the cool-down window, assigns payload severity, and renders the
//! delivery summary. An empty included set produces no payload at all.

use crate::types::{DedupKey, Finding, NotificationPayload, Severity};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Outcome of aggregation for one run
pub struct Aggregated {
    /// `None` when every finding was suppressed (explicit no-op, never an
    /// empty-message send)
    pub payload: Option<NotificationPayload>,
    pub included: Vec<Finding>,
    pub suppressed: usize,
}

pub struct FindingAggregator;

impl FindingAggregator {
    /// Build the delivery payload for one run.
    ///
    /// `prior_keys` are the dedup keys notified within the cool-down window;
    /// any finding matching one is suppressed. Duplicate keys within the
    /// same run keep only the first occurrence.
    pub fn aggregate(
        findings: &[Finding],
        prior_keys: &HashSet<DedupKey>,
        channel_targets: &[String],
        now: DateTime<Utc>,
    ) -> Aggregated {
        let mut seen_this_run: HashSet<DedupKey> = HashSet::new();
        let mut included = Vec::new();
        let mut suppressed = 0usize;

        for finding in findings {
            let key = finding.dedup_key();
            if prior_keys.contains(&key) || !seen_this_run.insert(key) {
                suppressed += 1;
                continue;
            }
            included.push(finding.clone());
        }

        if included.is_empty() {
            debug!(suppressed = suppressed, "No findings to deliver");
            return Aggregated {
                payload: None,
                included,
                suppressed,
            };
        }

        let severity = included
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Info);

        let payload = NotificationPayload {
            summary: render_summary(&included, severity, now),
            severity,
            findings: included.clone(),
            channel_targets: channel_targets.to_vec(),
        };

        Aggregated {
            payload: Some(payload),
            included,
            suppressed,
        }
    }
}

/// Render the human-readable summary, grouped per rule with counts
fn render_summary(findings: &[Finding], severity: Severity, now: DateTime<Utc>) -> String {
    let mut by_rule: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_rule.entry(&finding.rule_name).or_default().push(finding);
    }

    let mut out = format!(
        "**FinOps Hunter — {} [{}]**\n",
        now.format("%Y-%m-%dT%H:%M:%SZ"),
        severity
    );
    for (rule, group) in &by_rule {
        out.push_str(&format!("\n### {}: ({})\n", rule, group.len()));
        for finding in group {
            out.push_str(&format!("- {}\n", finding.message));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(resource_id: &str, rule_name: &str, severity: Severity) -> Finding {
        Finding {
            resource_id: resource_id.to_string(),
            rule_name: rule_name.to_string(),
            severity,
            message: format!("{} flagged by {}", resource_id, rule_name),
            discovered_at: Utc::now(),
        }
    }

    fn targets() -> Vec<String> {
        vec!["discord".to_string()]
    }

    #[test]
    fn test_empty_findings_produce_no_payload() {
        let result = FindingAggregator::aggregate(&[], &HashSet::new(), &targets(), Utc::now());
        assert!(result.payload.is_none());
        assert_eq!(result.suppressed, 0);
    }

    #[test]
    fn test_prior_key_suppresses_finding() {
        let findings = vec![
            finding("vol-1", "unattached-volume", Severity::Warn),
            finding("eip-1", "orphaned-address", Severity::Warn),
        ];
        let prior: HashSet<DedupKey> = [DedupKey {
            resource_id: "vol-1".to_string(),
            rule_name: "unattached-volume".to_string(),
        }]
        .into_iter()
        .collect();

        let result = FindingAggregator::aggregate(&findings, &prior, &targets(), Utc::now());
        let payload = result.payload.unwrap();

        assert_eq!(payload.findings.len(), 1);
        assert_eq!(payload.findings[0].resource_id, "eip-1");
        assert_eq!(result.suppressed, 1);
    }

    #[test]
    fn test_all_suppressed_is_explicit_noop() {
        let findings = vec![finding("vol-1", "unattached-volume", Severity::Warn)];
        let prior: HashSet<DedupKey> = findings.iter().map(|f| f.dedup_key()).collect();

        let result = FindingAggregator::aggregate(&findings, &prior, &targets(), Utc::now());
        assert!(result.payload.is_none());
        assert_eq!(result.suppressed, 1);
    }

    #[test]
    fn test_in_run_duplicates_collapse() {
        let findings = vec![
            finding("vol-1", "unattached-volume", Severity::Warn),
            finding("vol-1", "unattached-volume", Severity::Warn),
        ];

        let result =
            FindingAggregator::aggregate(&findings, &HashSet::new(), &targets(), Utc::now());
        assert_eq!(result.payload.unwrap().findings.len(), 1);
        assert_eq!(result.suppressed, 1);
    }

    #[test]
    fn test_payload_severity_is_max() {
        let findings = vec![
            finding("vol-1", "unattached-volume", Severity::Warn),
            finding("nat-1", "active-gateway", Severity::Critical),
            finding("db-1", "idle-resource", Severity::Info),
        ];

        let result =
            FindingAggregator::aggregate(&findings, &HashSet::new(), &targets(), Utc::now());
        assert_eq!(result.payload.unwrap().severity, Severity::Critical);
    }

    #[test]
    fn test_summary_groups_by_rule() {
        let findings = vec![
            finding("vol-1", "unattached-volume", Severity::Warn),
            finding("vol-2", "unattached-volume", Severity::Warn),
            finding("nat-1", "active-gateway", Severity::Critical),
        ];

        let result =
            FindingAggregator::aggregate(&findings, &HashSet::new(), &targets(), Utc::now());
        let summary = result.payload.unwrap().summary;

        assert!(summary.contains("### unattached-volume: (2)"));
        assert!(summary.contains("### active-gateway: (1)"));
        assert!(summary.contains("[critical]"));
    }
}
