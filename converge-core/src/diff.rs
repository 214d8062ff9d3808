//! Sub-entity diffing shared by composite resources.
//!
//! Composite resources (security groups and their rules, for example) are
//! written with whole-object PUTs, so an update must carry every sub-entity
//! that should survive. [`merge`] starts from what is observed, overlays what
//! is desired and drops what we retracted, and reports whether anything
//! actually changed so callers can skip the write entirely.

use std::collections::BTreeSet;

use tracing::debug;

use crate::ownership::{self, OwnershipRecord};

/// An individually addressable element of a composite resource.
pub trait SubEntity: Clone {
    /// Stable name identifying the entity within its parent. Keys are
    /// compared ASCII case-insensitively.
    fn key(&self) -> &str;

    /// Semantic equality over the fields that make up the entity's contract.
    /// Fields the provider fills in (ids, etags, states) must be ignored.
    fn same_as(&self, other: &Self) -> bool;

    /// Marker recorded in the ownership record for this entity.
    fn marker(&self) -> String;
}

/// Result of merging desired sub-entities into observed ones.
#[derive(Debug, Clone)]
pub struct MergeOutcome<T> {
    pub entities: Vec<T>,
    /// Entities added or replaced with the desired version.
    pub written: Vec<String>,
    /// Entities dropped because we owned them and no longer desire them.
    pub retracted: Vec<String>,
}

impl<T> MergeOutcome<T> {
    pub fn changed(&self) -> bool {
        !self.written.is_empty() || !self.retracted.is_empty()
    }
}

/// Merge `desired` into `observed`.
///
/// Observed order is preserved; entities that only exist in `desired` are
/// appended in desired order. An observed entity that is semantically equal
/// to its desired counterpart is kept as observed, so provider-filled fields
/// survive.
pub fn merge<T: SubEntity>(
    desired: &[T],
    observed: &[T],
    prior: &OwnershipRecord,
) -> MergeOutcome<T> {
    let desired_names: BTreeSet<String> = desired.iter().map(|e| folded(e.key())).collect();
    let observed_names: BTreeSet<String> = observed.iter().map(|e| folded(e.key())).collect();
    let prior_names: BTreeSet<String> = prior.names().iter().map(|n| folded(n)).collect();
    let delta = ownership::reconcile(&desired_names, &observed_names, &prior_names);

    let mut outcome = MergeOutcome {
        entities: Vec::with_capacity(desired.len().max(observed.len())),
        written: Vec::new(),
        retracted: Vec::new(),
    };

    for current in observed {
        let name = current.key();
        if delta.should_retract(&folded(name)) {
            outcome.retracted.push(name.to_string());
            continue;
        }
        match desired.iter().find(|d| d.key().eq_ignore_ascii_case(name)) {
            Some(wanted) if !wanted.same_as(current) => {
                outcome.written.push(name.to_string());
                outcome.entities.push(wanted.clone());
            }
            _ => outcome.entities.push(current.clone()),
        }
    }

    for wanted in desired {
        if !observed_names.contains(&folded(wanted.key())) {
            outcome.written.push(wanted.key().to_string());
            outcome.entities.push(wanted.clone());
        }
    }

    if !delta.stale.is_empty() {
        debug!(stale = ?delta.stale, "owned sub-entities already removed remotely");
    }
    if !delta.foreign.is_empty() {
        debug!(foreign = ?delta.foreign, "preserving externally managed sub-entities");
    }

    outcome
}

fn folded(key: &str) -> String {
    key.to_ascii_lowercase()
}

/// Ownership record describing `desired`.
pub fn record_of<T: SubEntity>(desired: &[T]) -> OwnershipRecord {
    desired.iter().map(|e| (e.key(), e.marker())).collect()
}
