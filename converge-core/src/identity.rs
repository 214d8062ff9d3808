//! Managed identities attached to compute resources.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Prefix of provider IDs as they appear on node objects.
pub const PROVIDER_ID_PREFIX: &str = "azure://";

/// Identity requested for a VM or scale set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmIdentity {
    #[default]
    None,
    SystemAssigned,
    UserAssigned,
}

/// A user-assigned identity referenced by provider ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssignedIdentity {
    pub provider_id: String,
}

/// Identity block of a remote compute object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResourceIdentity {
    SystemAssigned,
    UserAssigned {
        /// ARM resource IDs of the identities.
        identities: BTreeSet<String>,
    },
}

/// Strip the provider ID prefix, leaving a bare ARM resource ID.
pub fn sanitize_provider_id(id: &str) -> &str {
    id.strip_prefix(PROVIDER_ID_PREFIX).unwrap_or(id)
}

/// Convert a requested identity into the remote identity block.
pub fn resource_identity(
    identity: VmIdentity,
    user_assigned: &[UserAssignedIdentity],
) -> Result<Option<ResourceIdentity>> {
    match identity {
        VmIdentity::None => Ok(None),
        VmIdentity::SystemAssigned => Ok(Some(ResourceIdentity::SystemAssigned)),
        VmIdentity::UserAssigned => {
            if user_assigned.is_empty() {
                return Err(ReconcileError::invalid_spec(
                    "userAssignedIdentities",
                    "the user-assigned identity provider ids must not be null or empty for 'UserAssigned' identity type",
                ));
            }
            let identities = user_assigned
                .iter()
                .map(|id| sanitize_provider_id(&id.provider_id).to_string())
                .collect();
            Ok(Some(ResourceIdentity::UserAssigned { identities }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_assigned() {
        let identity = resource_identity(VmIdentity::SystemAssigned, &[]).unwrap();
        assert_eq!(identity, Some(ResourceIdentity::SystemAssigned));
        assert_eq!(resource_identity(VmIdentity::None, &[]).unwrap(), None);
    }

    #[test]
    fn test_user_assigned_strips_prefix() {
        let ids = vec![
            UserAssignedIdentity {
                provider_id: "azure:///subscriptions/123/identities/a".to_string(),
            },
            UserAssignedIdentity {
                provider_id: "/subscriptions/123/identities/b".to_string(),
            },
        ];
        let Some(ResourceIdentity::UserAssigned { identities }) =
            resource_identity(VmIdentity::UserAssigned, &ids).unwrap()
        else {
            panic!("expected user-assigned identity");
        };
        assert!(identities.contains("/subscriptions/123/identities/a"));
        assert!(identities.contains("/subscriptions/123/identities/b"));
    }

    #[test]
    fn test_user_assigned_requires_identities() {
        let err = resource_identity(VmIdentity::UserAssigned, &[]).unwrap_err();
        assert!(err.is_terminal());
    }
}
