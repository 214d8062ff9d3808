//! Resource identity and the per-resource-type spec seam.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ownership::OwnershipRecord;

/// Identifies one remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub name: String,
    pub resource_group: String,
}

impl ResourceId {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.name)
    }
}

/// Produces the desired parameters of one remote resource.
///
/// Each resource kind supplies one small value type implementing this trait.
/// `parameters` is the diff seam: given the observed remote object (or `None`
/// when it does not exist) it returns the payload to send, or `None` when the
/// remote object already satisfies the spec.
pub trait SpecGetter: Send + Sync {
    /// The remote object type, used both as observed state and as payload.
    type Resource: Clone + Send + Sync + 'static;

    fn resource_name(&self) -> &str;

    fn resource_group_name(&self) -> &str;

    /// Name of the parent resource, for nested resources.
    fn owner_resource_name(&self) -> &str {
        ""
    }

    fn id(&self) -> ResourceId {
        ResourceId::new(self.resource_group_name(), self.resource_name())
    }

    fn parameters(&self, existing: Option<&Self::Resource>) -> Result<Option<Self::Resource>>;

    /// Annotation key under which this resource's ownership record lives.
    /// `None` for resources without tracked sub-entities.
    fn ownership_key(&self) -> Option<String> {
        None
    }

    /// The record to commit once a write of this spec has been confirmed.
    fn desired_ownership(&self) -> OwnershipRecord {
        OwnershipRecord::default()
    }
}
