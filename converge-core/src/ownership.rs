//! Ownership tracking for sub-entities.
//!
//! An [`OwnershipRecord`] remembers which sub-entities (for example the
//! individual rules of a security group) this engine wrote last, keyed by
//! name, with an opaque marker of the written content. Comparing it with the
//! desired and observed names tells foreign entities (never written by us)
//! apart from retracted ones (written by us, no longer desired).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Sub-entity name → marker of the content last written for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnershipRecord(BTreeMap<String, String>);

impl OwnershipRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, marker: impl Into<String>) {
        self.0.insert(name.into(), marker.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn marker(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.0.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode a record stored as an annotation value.
    pub fn from_annotation(key: &str, value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(value).map_err(|source| ReconcileError::InvalidAnnotation {
            key: key.to_string(),
            source,
        })
    }

    /// Encode the record as an annotation value (a flat JSON string map).
    pub fn to_annotation(&self) -> String {
        // A string-to-string map always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OwnershipRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// How the observed sub-entities relate to the ownership record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipDelta {
    /// Owned by us, no longer desired, still present remotely: drop them.
    pub retract: BTreeSet<String>,
    /// Owned by us, no longer desired, already gone remotely.
    pub stale: BTreeSet<String>,
    /// Present remotely and never written by us.
    pub foreign: BTreeSet<String>,
}

impl OwnershipDelta {
    pub fn should_retract(&self, name: &str) -> bool {
        self.retract.contains(name)
    }
}

/// Classify observed sub-entities against the prior ownership record.
///
/// An entity is retracted iff it was owned and is no longer desired. Foreign
/// entities are never retracted, whatever the desired set contains.
pub fn reconcile(
    desired: &BTreeSet<String>,
    observed: &BTreeSet<String>,
    prior_owned: &BTreeSet<String>,
) -> OwnershipDelta {
    let mut delta = OwnershipDelta::default();

    for name in prior_owned.difference(desired) {
        if observed.contains(name) {
            delta.retract.insert(name.clone());
        } else {
            delta.stale.insert(name.clone());
        }
    }

    delta.foreign = observed.difference(prior_owned).cloned().collect();
    delta
}
