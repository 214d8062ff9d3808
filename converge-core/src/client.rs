//! The remote resource client consumed by the engine.
//!
//! Implementations wrap a cloud SDK for one resource type. Writes never
//! block on provisioning: they hand back an [`OperationHandle`] that the
//! engine polls on later passes.

use async_trait::async_trait;

use crate::error::ClientError;
use crate::operation::OperationHandle;
use crate::resource::ResourceId;

/// Result type for client calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// What a create-or-update call returned.
#[derive(Debug, Clone)]
pub enum Submission<R> {
    /// The provider finished synchronously.
    Completed(R),
    /// The provider accepted a long-running operation.
    Accepted(OperationHandle),
}

#[async_trait]
pub trait RemoteResourceClient<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    /// Read the remote object. Fails with [`ClientError::NotFound`] when absent.
    async fn get(&self, id: &ResourceId) -> ClientResult<R>;

    async fn create_or_update_async(&self, id: &ResourceId, payload: R)
        -> ClientResult<Submission<R>>;

    /// Start deleting the remote object. `None` means it is already gone.
    async fn delete_async(&self, id: &ResourceId) -> ClientResult<Option<OperationHandle>>;

    async fn is_done(&self, handle: &OperationHandle) -> ClientResult<bool>;

    /// Terminal object of a finished create or update.
    async fn result(&self, handle: &OperationHandle) -> ClientResult<R>;

    /// Ask the provider to cancel an operation. Returns `false` when the
    /// provider has no cancellation support.
    async fn cancel(&self, _handle: &OperationHandle) -> ClientResult<bool> {
        Ok(false)
    }
}
