//! Long-running remote operations.
//!
//! A write returns an [`OperationHandle`]; the handle is persisted in the
//! owner's status and polled once per reconciliation pass. Polling never
//! waits for the operation: each [`Poller::poll`] call is a single bounded
//! round trip, and "not done yet" is a normal answer.
//!
//! ```text
//! Submitted -> Polling -> Done
//!                     \-> Failed
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::RemoteResourceClient;
use crate::error::{ClientError, ReconcileError, Result};
use crate::ownership::OwnershipRecord;
use crate::resource::ResourceId;

/// Kind of remote write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    #[default]
    Submitted,
    Polling,
    Done,
    Failed,
}

impl OperationState {
    /// Done and Failed handles are dropped from status.
    pub fn is_finished(&self) -> bool {
        matches!(self, OperationState::Done | OperationState::Failed)
    }
}

/// Persisted reference to an in-flight remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Opaque provider token used to resume polling.
    pub token: String,
    pub kind: OperationKind,
    pub resource: ResourceId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub state: OperationState,
    /// Ownership record to commit once this write is confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_ownership: Option<PendingOwnership>,
}

/// An ownership record waiting for its write to be confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOwnership {
    pub key: String,
    pub record: OwnershipRecord,
}

impl OperationHandle {
    pub fn new(token: impl Into<String>, kind: OperationKind, resource: ResourceId) -> Self {
        Self {
            token: token.into(),
            kind,
            resource,
            created_at: Utc::now(),
            state: OperationState::Submitted,
            pending_ownership: None,
        }
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

/// Answer of a single poll.
#[derive(Debug, Clone)]
pub enum PollOutcome<R> {
    /// Still running, or the poll itself ran out of time.
    InProgress,
    /// Finished successfully. Deletes carry no object.
    Succeeded(Option<R>),
    /// The provider reported a terminal failure.
    Failed(ClientError),
}

/// Polls handles through a client with a per-call time limit.
pub struct Poller<'a, C> {
    client: &'a C,
    call_timeout: Duration,
}

impl<'a, C> Poller<'a, C> {
    pub fn new(client: &'a C, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    /// Ask once whether the operation finished and, if so, fetch its result.
    ///
    /// The handle's state is advanced in place. Transient client errors are
    /// returned as errors and leave the handle polling. A write whose token
    /// the provider no longer knows is reported as failed.
    pub async fn poll<R>(&self, handle: &mut OperationHandle) -> Result<PollOutcome<R>>
    where
        C: RemoteResourceClient<R>,
        R: Send + Sync + 'static,
    {
        if handle.state == OperationState::Submitted {
            handle.state = OperationState::Polling;
        }

        let done = match timeout(self.call_timeout, self.client.is_done(handle)).await {
            Err(_) => {
                debug!(resource = %handle.resource, kind = %handle.kind, "poll timed out, will retry next pass");
                return Ok(PollOutcome::InProgress);
            }
            Ok(Ok(done)) => done,
            Ok(Err(e)) => return self.classify(handle, e),
        };

        if !done {
            debug!(
                resource = %handle.resource,
                kind = %handle.kind,
                age_secs = handle.age().num_seconds(),
                "operation still in progress"
            );
            return Ok(PollOutcome::InProgress);
        }

        if handle.kind == OperationKind::Delete {
            handle.state = OperationState::Done;
            info!(resource = %handle.resource, "delete operation completed");
            return Ok(PollOutcome::Succeeded(None));
        }

        match timeout(self.call_timeout, self.client.result(handle)).await {
            Err(_) => {
                debug!(resource = %handle.resource, "fetching operation result timed out");
                Ok(PollOutcome::InProgress)
            }
            Ok(Ok(object)) => {
                handle.state = OperationState::Done;
                info!(resource = %handle.resource, kind = %handle.kind, "operation completed");
                Ok(PollOutcome::Succeeded(Some(object)))
            }
            Ok(Err(e)) => self.classify(handle, e),
        }
    }

    fn classify<R>(&self, handle: &mut OperationHandle, err: ClientError) -> Result<PollOutcome<R>> {
        match err {
            ClientError::OperationFailed { .. } => {
                handle.state = OperationState::Failed;
                warn!(resource = %handle.resource, kind = %handle.kind, error = %err, "operation failed");
                Ok(PollOutcome::Failed(err))
            }
            ClientError::NotFound(_) if handle.kind == OperationKind::Delete => {
                handle.state = OperationState::Done;
                Ok(PollOutcome::Succeeded(None))
            }
            // The token expired or its result was already taken; polling it
            // again can never succeed.
            ClientError::NotFound(_) => {
                handle.state = OperationState::Failed;
                warn!(
                    resource = %handle.resource,
                    kind = %handle.kind,
                    token = %handle.token,
                    "operation unknown to provider, discarding handle"
                );
                Ok(PollOutcome::Failed(err))
            }
            other => Err(ReconcileError::Client(other)),
        }
    }
}
