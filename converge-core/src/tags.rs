//! Tags stamped on every resource the engine creates.

use std::collections::BTreeMap;

/// Prefix of the per-cluster lifecycle tag.
pub const CLUSTER_TAG_PREFIX: &str = "converge.io_cluster_";
pub const NAME_TAG: &str = "Name";
pub const ROLE_TAG: &str = "converge.io_role";

/// Lifecycle value meaning the resource is created and deleted by us.
pub const LIFECYCLE_OWNED: &str = "owned";

pub type Tags = BTreeMap<String, String>;

/// Tag key marking a resource as belonging to `cluster`.
pub fn cluster_tag_key(cluster: &str) -> String {
    format!("{CLUSTER_TAG_PREFIX}{cluster}")
}

/// Build the tags of an owned resource. Additional tags never override the
/// lifecycle, name or role tags.
pub fn build_tags(cluster: &str, name: &str, role: Option<&str>, additional: &Tags) -> Tags {
    let mut tags = additional.clone();
    tags.insert(cluster_tag_key(cluster), LIFECYCLE_OWNED.to_string());
    tags.insert(NAME_TAG.to_string(), name.to_string());
    if let Some(role) = role {
        tags.insert(ROLE_TAG.to_string(), role.to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_tags() {
        let additional: Tags = [("env".to_string(), "prod".to_string())].into_iter().collect();
        let tags = build_tags("c1", "vm-0", Some("node"), &additional);
        assert_eq!(tags.get("converge.io_cluster_c1").map(String::as_str), Some("owned"));
        assert_eq!(tags.get("Name").map(String::as_str), Some("vm-0"));
        assert_eq!(tags.get(ROLE_TAG).map(String::as_str), Some("node"));
        assert_eq!(tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_additional_tags_cannot_override_name() {
        let additional: Tags = [("Name".to_string(), "spoofed".to_string())].into_iter().collect();
        let tags = build_tags("c1", "nsg", None, &additional);
        assert_eq!(tags.get("Name").map(String::as_str), Some("nsg"));
        assert!(!tags.contains_key(ROLE_TAG));
    }
}
