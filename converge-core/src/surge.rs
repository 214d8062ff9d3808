//! Capacity surge policy for scalable resource sets.
//!
//! During a rolling model update the set is temporarily grown by `max_surge`
//! instances so that old instances can be replaced without dropping below
//! the desired size. Scaling back down is the job of a separate instance
//! convergence pass, never of this policy.

use serde::{Deserialize, Serialize};

/// Whether the fleet needs to roll onto a new model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rollout {
    /// Fields requiring an instance upgrade differ between spec and remote.
    pub model_changed: bool,
    /// Enough instances already run the latest model.
    pub fleet_converged: bool,
}

impl Rollout {
    pub fn pending(&self) -> bool {
        self.model_changed || !self.fleet_converged
    }
}

/// Surge settings for one resource set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurgePolicy {
    pub max_surge: u32,
    /// Replica count is owned by another component (an autoscaler).
    #[serde(default)]
    pub replicas_externally_managed: bool,
}

/// Capacity decided for one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    pub current: i64,
    pub target: i64,
    pub surged: bool,
}

impl CapacityPlan {
    /// The plan asks for more instances than currently exist.
    pub fn grows(&self) -> bool {
        self.target > self.current
    }
}

impl SurgePolicy {
    pub fn new(max_surge: u32, replicas_externally_managed: bool) -> Self {
        Self {
            max_surge,
            replicas_externally_managed,
        }
    }

    pub fn plan(&self, current: i64, desired: i64, rollout: Rollout) -> CapacityPlan {
        let target = target_capacity(
            desired,
            self.max_surge,
            self.replicas_externally_managed,
            rollout.pending(),
        );
        CapacityPlan {
            current,
            target,
            surged: target != desired,
        }
    }
}

/// Target size for a set whose desired size is `desired`.
///
/// The result is never below `desired`.
pub fn target_capacity(
    desired: i64,
    max_surge: u32,
    replicas_externally_managed: bool,
    rollout_pending: bool,
) -> i64 {
    if replicas_externally_managed || max_surge == 0 || !rollout_pending {
        return desired;
    }
    desired.saturating_add(i64::from(max_surge))
}
