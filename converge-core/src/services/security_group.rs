//! Network security groups and their rules.
//!
//! A security group is written with a whole-object PUT, so every update
//! carries the full rule list. Rules added by other tools are kept; rules
//! this engine wrote and no longer wants are dropped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::{self, SubEntity};
use crate::error::{ReconcileError, Result};
use crate::ownership::OwnershipRecord;
use crate::resource::SpecGetter;
use crate::tags::{self, Tags};

/// Annotation key prefix of the per-group ownership record.
pub const LAST_APPLIED_RULES_PREFIX: &str = "converge.io/last-applied-security-rules-";

const ANY: &str = "*";

fn any() -> String {
    ANY.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "*")]
    Any,
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    #[default]
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Inbound,
    Outbound,
}

/// One rule of a security group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: i32,
    pub protocol: Protocol,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default = "any")]
    pub source_port_range: String,
    #[serde(default = "any")]
    pub destination_port_range: String,
    #[serde(default = "any")]
    pub source_address_prefix: String,
    #[serde(default = "any")]
    pub destination_address_prefix: String,

    // Filled in by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

impl SecurityRule {
    /// An inbound TCP allow rule for `port` from anywhere.
    pub fn allow_inbound_tcp(name: &str, description: &str, priority: i32, port: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            priority,
            protocol: Protocol::Tcp,
            access: Access::Allow,
            direction: Direction::Inbound,
            source_port_range: any(),
            destination_port_range: port.to_string(),
            source_address_prefix: any(),
            destination_address_prefix: any(),
            id: None,
            etag: None,
            provisioning_state: None,
        }
    }
}

impl SubEntity for SecurityRule {
    fn key(&self) -> &str {
        &self.name
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.priority == other.priority
            && self.protocol == other.protocol
            && self.access == other.access
            && self.direction == other.direction
            && self.source_port_range.eq_ignore_ascii_case(&other.source_port_range)
            && self
                .destination_port_range
                .eq_ignore_ascii_case(&other.destination_port_range)
            && self
                .source_address_prefix
                .eq_ignore_ascii_case(&other.source_address_prefix)
            && self
                .destination_address_prefix
                .eq_ignore_ascii_case(&other.destination_address_prefix)
    }

    fn marker(&self) -> String {
        self.description.clone()
    }
}

/// Remote security group object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub location: String,
    /// Concurrency token; an update carrying a stale etag is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Desired state of one security group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub cluster_name: String,
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
    #[serde(default)]
    pub additional_tags: Tags,
    /// Rules written by the last confirmed apply.
    #[serde(default)]
    pub last_applied: OwnershipRecord,
}

impl SecurityGroupSpec {
    pub fn annotation_key(name: &str) -> String {
        format!("{LAST_APPLIED_RULES_PREFIX}{name}")
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for rule in &self.security_rules {
            if !seen.insert(rule.name.to_ascii_lowercase()) {
                return Err(ReconcileError::invalid_spec(
                    "securityRules",
                    format!("rule name {} is used more than once", rule.name),
                ));
            }
        }
        Ok(())
    }

    fn tags(&self, observed: Option<&Tags>) -> Tags {
        let mut merged = observed.cloned().unwrap_or_default();
        merged.extend(tags::build_tags(
            &self.cluster_name,
            &self.name,
            None,
            &self.additional_tags,
        ));
        merged
    }
}

impl SpecGetter for SecurityGroupSpec {
    type Resource = SecurityGroup;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn parameters(&self, existing: Option<&SecurityGroup>) -> Result<Option<SecurityGroup>> {
        self.validate()?;

        let Some(existing) = existing else {
            return Ok(Some(SecurityGroup {
                id: None,
                location: self.location.clone(),
                etag: None,
                tags: self.tags(None),
                security_rules: self.security_rules.clone(),
                provisioning_state: None,
            }));
        };

        let outcome = diff::merge(&self.security_rules, &existing.security_rules, &self.last_applied);
        if !outcome.changed() {
            debug!(nsg = %self.name, "security rules up to date");
            return Ok(None);
        }

        debug!(
            nsg = %self.name,
            written = ?outcome.written,
            retracted = ?outcome.retracted,
            "security rules changed"
        );

        Ok(Some(SecurityGroup {
            id: existing.id.clone(),
            location: self.location.clone(),
            etag: existing.etag.clone(),
            tags: self.tags(Some(&existing.tags)),
            security_rules: outcome.entities,
            provisioning_state: None,
        }))
    }

    fn ownership_key(&self) -> Option<String> {
        Some(Self::annotation_key(&self.name))
    }

    fn desired_ownership(&self) -> OwnershipRecord {
        diff::record_of(&self.security_rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_spec(rules: Vec<SecurityRule>, last_applied: &[(&str, &str)]) -> SecurityGroupSpec {
        SecurityGroupSpec {
            name: "test-nsg".to_string(),
            resource_group: "test-group".to_string(),
            location: "test-location".to_string(),
            cluster_name: "my-cluster".to_string(),
            security_rules: rules,
            additional_tags: Tags::new(),
            last_applied: last_applied.iter().copied().collect(),
        }
    }

    fn make_existing(rules: Vec<SecurityRule>) -> SecurityGroup {
        let mut rules = rules;
        for rule in &mut rules {
            rule.id = Some(format!("/rules/{}", rule.name));
            rule.etag = Some("W/\"rule\"".to_string());
            rule.provisioning_state = Some("Succeeded".to_string());
        }
        SecurityGroup {
            id: Some("/nsg/test-nsg".to_string()),
            location: "test-location".to_string(),
            etag: Some("fake-etag".to_string()),
            tags: Tags::new(),
            security_rules: rules,
            provisioning_state: Some("Succeeded".to_string()),
        }
    }

    fn ssh() -> SecurityRule {
        SecurityRule::allow_inbound_tcp("allow_ssh", "Allow SSH", 2200, "22")
    }

    fn http() -> SecurityRule {
        SecurityRule::allow_inbound_tcp("allow_http", "Allow HTTP", 2300, "80")
    }

    fn custom() -> SecurityRule {
        SecurityRule::allow_inbound_tcp("custom", "Vendor rule", 2400, "443")
    }

    fn names(group: &SecurityGroup) -> Vec<&str> {
        group.security_rules.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_new_group_carries_all_rules_and_tags() {
        let spec = make_spec(vec![ssh(), http()], &[]);
        let group = spec.parameters(None).unwrap().unwrap();
        assert_eq!(names(&group), vec!["allow_ssh", "allow_http"]);
        assert_eq!(group.etag, None);
        assert_eq!(
            group.tags.get("converge.io_cluster_my-cluster").map(String::as_str),
            Some("owned")
        );
        assert_eq!(group.tags.get("Name").map(String::as_str), Some("test-nsg"));
    }

    #[test]
    fn test_existing_with_all_rules_is_no_op() {
        let spec = make_spec(vec![ssh(), http()], &[("allow_ssh", "Allow SSH"), ("allow_http", "Allow HTTP")]);
        let existing = make_existing(vec![http(), ssh()]);
        assert!(spec.parameters(Some(&existing)).unwrap().is_none());
    }

    #[test]
    fn test_value_case_does_not_trigger_update() {
        let mut desired = ssh();
        desired.source_address_prefix = "Internet".to_string();
        let mut observed = ssh();
        observed.source_address_prefix = "internet".to_string();

        let spec = make_spec(vec![desired], &[]);
        assert!(spec.parameters(Some(&make_existing(vec![observed]))).unwrap().is_none());
    }

    #[test]
    fn test_missing_rule_is_added_and_foreign_rule_kept() {
        let spec = make_spec(vec![ssh(), http()], &[("allow_ssh", "Allow SSH"), ("allow_http", "Allow HTTP")]);
        let existing = make_existing(vec![ssh(), custom()]);

        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(names(&group), vec!["allow_ssh", "custom", "allow_http"]);
        assert_eq!(group.etag.as_deref(), Some("fake-etag"));
        // foreign rule is carried verbatim, provider fields included
        assert_eq!(group.security_rules[1], existing.security_rules[1]);
    }

    #[test]
    fn test_owned_rule_dropped_while_owned_missing_rule_is_restored() {
        // custom was written by us earlier and is no longer desired; http was
        // ours too but has disappeared remotely
        let spec = make_spec(
            vec![ssh(), http()],
            &[
                ("allow_ssh", "Allow SSH"),
                ("custom", "Vendor rule"),
                ("allow_http", "Allow HTTP"),
            ],
        );
        let existing = make_existing(vec![ssh(), custom()]);

        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(names(&group), vec!["allow_ssh", "allow_http"]);
        assert_eq!(group.security_rules[0], existing.security_rules[0]);
        assert_eq!(group.security_rules[1], http());

        let record = spec.desired_ownership();
        assert!(record.contains("allow_http"));
        assert!(!record.contains("custom"));
    }

    #[test]
    fn test_rule_name_case_is_not_a_change() {
        let mut observed = ssh();
        observed.name = "Allow_SSH".to_string();
        let spec = make_spec(vec![ssh()], &[("allow_ssh", "Allow SSH")]);
        let existing = make_existing(vec![observed]);
        assert!(spec.parameters(Some(&existing)).unwrap().is_none());

        let mut moved = ssh();
        moved.destination_port_range = "2222".to_string();
        let spec = make_spec(vec![moved], &[("allow_ssh", "Allow SSH")]);
        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(names(&group), vec!["allow_ssh"]);
        assert_eq!(group.security_rules[0].destination_port_range, "2222");
    }

    #[test]
    fn test_duplicate_rule_names_differing_in_case_rejected() {
        let mut shouting = ssh();
        shouting.name = "ALLOW_SSH".to_string();
        let err = make_spec(vec![ssh(), shouting], &[]).parameters(None).unwrap_err();
        assert!(err.is_terminal());
    }

    #[test]
    fn test_owned_rule_no_longer_desired_is_retracted() {
        let spec = make_spec(vec![ssh()], &[("allow_ssh", "Allow SSH"), ("custom", "Vendor rule")]);
        let existing = make_existing(vec![ssh(), custom()]);

        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(names(&group), vec!["allow_ssh"]);
        assert!(!spec.desired_ownership().contains("custom"));
    }

    #[test]
    fn test_changed_rule_field_triggers_update() {
        let mut deny = ssh();
        deny.access = Access::Deny;
        let spec = make_spec(vec![deny], &[("allow_ssh", "Allow SSH")]);
        let existing = make_existing(vec![ssh()]);

        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(group.security_rules[0].access, Access::Deny);
        assert_eq!(group.security_rules[0].id, None);
    }

    #[test]
    fn test_update_keeps_foreign_tags() {
        let spec = make_spec(vec![ssh()], &[]);
        let mut existing = make_existing(vec![]);
        existing.tags.insert("cost-center".to_string(), "42".to_string());

        let group = spec.parameters(Some(&existing)).unwrap().unwrap();
        assert_eq!(group.tags.get("cost-center").map(String::as_str), Some("42"));
        assert_eq!(group.tags.get("Name").map(String::as_str), Some("test-nsg"));
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let spec = make_spec(vec![ssh(), ssh()], &[]);
        let err = spec.parameters(None).unwrap_err();
        assert!(err.is_terminal());
        assert!(err.to_string().contains("allow_ssh"));
    }

    #[test]
    fn test_ownership_record_maps_name_to_description() {
        let spec = make_spec(vec![ssh(), http()], &[]);
        assert_eq!(
            spec.ownership_key().as_deref(),
            Some("converge.io/last-applied-security-rules-test-nsg")
        );
        let record = spec.desired_ownership();
        assert_eq!(record.marker("allow_http"), Some("Allow HTTP"));
        assert_eq!(record.len(), 2);
    }
}
