//! Declarative diff-and-converge engine for cloud resources.
//!
//! A [`SpecGetter`] describes one desired resource and diffs it against the
//! observed remote object. The [`Reconciler`] drives that diff through a
//! [`RemoteResourceClient`], tracks which sub-entities it owns, and polls
//! long-running operations across passes instead of blocking on them.

pub mod client;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod identity;
pub mod operation;
pub mod ownership;
pub mod resource;
pub mod services;
pub mod skus;
pub mod status;
pub mod surge;
pub mod tags;

pub use client::{ClientResult, RemoteResourceClient, Submission};
pub use config::DriverConfig;
pub use driver::{DeleteOutcome, Outcome, Reconciler};
pub use error::{ClientError, ReconcileError, Result};
pub use operation::{OperationHandle, OperationKind, OperationState};
pub use ownership::OwnershipRecord;
pub use resource::{ResourceId, SpecGetter};
pub use status::{MemoryStatusStore, ReconcileStatus, StatusStore, StoreError};
pub use surge::{CapacityPlan, SurgePolicy};
