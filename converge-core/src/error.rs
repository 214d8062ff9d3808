//! Error types for the converge engine.
//!
//! Errors are split by who raises them: [`ClientError`] comes back from a
//! [`RemoteResourceClient`](crate::client::RemoteResourceClient), while
//! [`ReconcileError`] is what the engine hands to the surrounding control loop.

use thiserror::Error;

use crate::operation::OperationKind;
use crate::resource::ResourceId;
use crate::status::StoreError;

/// Errors reported by a remote resource client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The remote resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The remote object changed since it was read (etag mismatch).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The provider is throttling requests.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Network or transport failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The provider reported a terminal failure for a long-running operation.
    #[error("operation {token} failed: {message}")]
    OperationFailed { token: String, message: String },
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

/// Errors surfaced by a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired spec violates a precondition the remote API always rejects.
    #[error("invalid spec field {field}: {reason}")]
    InvalidSpec { field: String, reason: String },

    /// The resource carries a provider ID but no longer exists remotely.
    #[error("resource {provider_id} was deleted out of band and will not be recreated")]
    ResourceDeleted { provider_id: String },

    /// An ownership annotation could not be decoded.
    #[error("invalid ownership annotation {key}: {source}")]
    InvalidAnnotation {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A remote call failed.
    #[error("remote call failed: {0}")]
    Client(#[from] ClientError),

    /// A remote call did not finish within its configured timeout.
    #[error("{call} for {resource} timed out")]
    Timeout { call: &'static str, resource: ResourceId },

    /// A different kind of operation is still running for this resource.
    #[error("{kind} operation for {resource} is still in progress")]
    OperationInProgress {
        kind: OperationKind,
        resource: ResourceId,
    },

    /// A long-running operation ended in a terminal failure; its handle is gone.
    #[error("{kind} operation for {resource} failed: {message}")]
    OperationFailed {
        kind: OperationKind,
        resource: ResourceId,
        message: String,
    },

    /// The status was written by someone else during this pass.
    #[error("status conflict: expected version {expected}, found {actual}")]
    OwnershipConflict { expected: u64, actual: u64 },

    /// The status store failed.
    #[error("status store: {0}")]
    Store(StoreError),
}

impl ReconcileError {
    pub fn invalid_spec(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ReconcileError::InvalidSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Terminal errors must not be requeued: retrying the same input can
    /// never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidSpec { .. }
                | ReconcileError::ResourceDeleted { .. }
                | ReconcileError::InvalidAnnotation { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionMismatch { expected, actual } => {
                ReconcileError::OwnershipConflict { expected, actual }
            }
            other => ReconcileError::Store(other),
        }
    }
}

/// Result type for reconciliation.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_spec_is_terminal() {
        let err = ReconcileError::invalid_spec("size", "needs at least 2 vCPUs");
        assert!(err.is_terminal());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "invalid spec field size: needs at least 2 vCPUs"
        );
    }

    #[test]
    fn test_deleted_out_of_band_names_provider_id() {
        let err = ReconcileError::ResourceDeleted {
            provider_id: "fake/vm/id".to_string(),
        };
        assert!(err.is_terminal());
        assert!(err.to_string().contains("fake/vm/id"));
    }

    #[test]
    fn test_client_errors_are_retryable() {
        let err: ReconcileError = ClientError::Throttled("429".to_string()).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_version_mismatch_becomes_ownership_conflict() {
        let err: ReconcileError = StoreError::VersionMismatch {
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(matches!(
            err,
            ReconcileError::OwnershipConflict {
                expected: 3,
                actual: 4
            }
        ));
        assert!(err.is_retryable());
    }
}
