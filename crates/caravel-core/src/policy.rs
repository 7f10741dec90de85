//! Bucket replication policy.
//!
//! A policy is fetched per bucket from the source service and decides, per
//! object key, whether a log entry should be replicated at all. Caravel does
//! not author policies; it only evaluates them.

use serde::{Deserialize, Serialize};

/// Status of a replication rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum RuleStatus {
    /// Rule is enabled.
    #[default]
    Enabled,
    /// Rule is disabled.
    Disabled,
}

impl RuleStatus {
    /// Check if the rule is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }
}

/// A single replication rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyRule {
    /// Unique identifier for this rule.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Key prefix the rule applies to; absent means all keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Rule status.
    #[serde(default)]
    pub status: RuleStatus,
    /// Destination bucket (ARN or name).
    pub destination: String,
    /// Storage class at the destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl PolicyRule {
    /// Whether this rule selects the given object key.
    #[must_use]
    pub fn applies_to(&self, key: &str) -> bool {
        if !self.status.is_enabled() {
            return false;
        }
        match &self.prefix {
            Some(prefix) => key.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

/// The replication policy of a bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicationPolicy {
    /// Role identity to assume against the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Replication rules, evaluated in order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl ReplicationPolicy {
    /// Finds the first enabled rule that selects the key.
    #[must_use]
    pub fn find_rule(&self, key: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.applies_to(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(prefix: Option<&str>, status: RuleStatus) -> PolicyRule {
        PolicyRule {
            id: "rule".to_string(),
            prefix: prefix.map(String::from),
            status,
            destination: "arn:aws:s3:::dest".to_string(),
            storage_class: None,
        }
    }

    #[test]
    fn test_rule_prefix_matching() {
        let r = rule(Some("logs/"), RuleStatus::Enabled);
        assert!(r.applies_to("logs/access.log"));
        assert!(!r.applies_to("data/file.bin"));

        let r = rule(None, RuleStatus::Enabled);
        assert!(r.applies_to("anything"));
    }

    #[test]
    fn test_disabled_rule_never_applies() {
        let r = rule(None, RuleStatus::Disabled);
        assert!(!r.applies_to("anything"));
    }

    #[test]
    fn test_find_rule_takes_first_match() {
        let policy = ReplicationPolicy {
            role: Some("arn:aws:iam::1:role/replication".to_string()),
            rules: vec![
                rule(Some("logs/"), RuleStatus::Disabled),
                rule(Some("logs/"), RuleStatus::Enabled),
                rule(None, RuleStatus::Enabled),
            ],
        };

        // Disabled rule is skipped; the enabled prefixed rule wins over the
        // catch-all that follows it.
        let found = policy.find_rule("logs/a").unwrap();
        assert_eq!(found.prefix.as_deref(), Some("logs/"));
        assert!(found.status.is_enabled());

        let found = policy.find_rule("data/a").unwrap();
        assert!(found.prefix.is_none());
    }

    #[test]
    fn test_policy_wire_format() {
        let json = r#"{
            "Role": "arn:aws:iam::1:role/replication",
            "Rules": [
                {"ID": "r1", "Prefix": "x/", "Status": "Enabled", "Destination": "dest"}
            ]
        }"#;
        let policy: ReplicationPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.rules.len(), 1);
        assert_eq!(policy.rules[0].id, "r1");
        assert!(policy.find_rule("x/y").is_some());
        assert!(policy.find_rule("y/x").is_none());
    }
}
