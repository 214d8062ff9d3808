//! Reconciliation driver.
//!
//! One pass per call: resume an in-flight operation if the status holds a
//! handle, otherwise fetch the remote object, diff it against the spec and
//! submit a write if needed. Nothing here waits for provisioning; a pending
//! operation is returned as [`Outcome::Pending`] and picked up again on the
//! next pass.
//!
//! Ownership records are committed only once the remote write is confirmed.

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::{RemoteResourceClient, Submission};
use crate::config::DriverConfig;
use crate::error::{ClientError, ReconcileError, Result};
use crate::operation::{OperationHandle, OperationKind, PendingOwnership, PollOutcome, Poller};
use crate::resource::{ResourceId, SpecGetter};
use crate::status::{ReconcileStatus, StatusStore, Versioned};

/// Result of a reconcile pass.
#[derive(Debug, Clone)]
pub enum Outcome<R> {
    /// The remote object already matched the spec. `None` only when the
    /// operation that produced it returned no object.
    UpToDate(Option<R>),
    /// A write finished during this pass.
    Applied(R),
    /// A write is in flight; its handle is stored in the status.
    Pending(OperationHandle),
}

impl<R> Outcome<R> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }
}

/// Result of a delete pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    Pending(OperationHandle),
}

/// Drives specs of one resource kind through a remote client.
pub struct Reconciler<C> {
    client: C,
    config: DriverConfig,
}

impl<C> Reconciler<C> {
    pub fn new(client: C, config: DriverConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn poller(&self) -> Poller<'_, C> {
        Poller::new(&self.client, self.config.poll_timeout())
    }

    /// Run one reconcile pass for `spec`, reading and updating `status`.
    pub async fn reconcile<S>(
        &self,
        spec: &S,
        status: &mut ReconcileStatus,
    ) -> Result<Outcome<S::Resource>>
    where
        S: SpecGetter,
        C: RemoteResourceClient<S::Resource>,
    {
        let id = spec.id();

        if let Some(handle) = status.operation(&id).cloned() {
            if handle.kind == OperationKind::Delete {
                return Err(ReconcileError::OperationInProgress {
                    kind: handle.kind,
                    resource: id,
                });
            }
            return self.resume::<S::Resource>(handle, status).await;
        }

        let existing = self.fetch::<S::Resource>(&id).await?;
        let kind = if existing.is_some() {
            OperationKind::Update
        } else {
            OperationKind::Create
        };

        let Some(payload) = spec.parameters(existing.as_ref())? else {
            debug!(resource = %id, "remote state matches spec");
            commit_ownership(spec, status);
            return Ok(Outcome::UpToDate(existing));
        };

        info!(resource = %id, %kind, "submitting write");
        let submission = timeout(
            self.config.submit_timeout(),
            self.client.create_or_update_async(&id, payload),
        )
        .await
        .map_err(|_| ReconcileError::Timeout {
            call: "create_or_update",
            resource: id.clone(),
        })??;

        match submission {
            Submission::Completed(object) => {
                info!(resource = %id, %kind, "write completed synchronously");
                commit_ownership(spec, status);
                Ok(Outcome::Applied(object))
            }
            Submission::Accepted(mut handle) => {
                handle.kind = kind;
                handle.resource = id.clone();
                handle.pending_ownership = spec.ownership_key().map(|key| PendingOwnership {
                    key,
                    record: spec.desired_ownership(),
                });
                info!(resource = %id, %kind, token = %handle.token, "write accepted, polling on later passes");
                status.set_operation(handle.clone());
                Ok(Outcome::Pending(handle))
            }
        }
    }

    /// Run one delete pass for `spec`.
    ///
    /// An in-flight create or update is abandoned; the client is asked to
    /// cancel it but the remote operation may keep running.
    pub async fn delete<S>(&self, spec: &S, status: &mut ReconcileStatus) -> Result<DeleteOutcome>
    where
        S: SpecGetter,
        C: RemoteResourceClient<S::Resource>,
    {
        let id = spec.id();

        if let Some(mut handle) = status.operation(&id).cloned() {
            if handle.kind == OperationKind::Delete {
                return match self.poller().poll::<S::Resource>(&mut handle).await {
                    Ok(PollOutcome::InProgress) => {
                        status.set_operation(handle.clone());
                        Ok(DeleteOutcome::Pending(handle))
                    }
                    Ok(PollOutcome::Succeeded(_)) => {
                        status.remove_operation(&id);
                        clear_ownership(spec, status);
                        info!(resource = %id, "resource deleted");
                        Ok(DeleteOutcome::Deleted)
                    }
                    Ok(PollOutcome::Failed(err)) => {
                        status.remove_operation(&id);
                        Err(operation_failed(&handle, err))
                    }
                    Err(err) => {
                        status.set_operation(handle);
                        Err(err)
                    }
                };
            }
            self.abandon::<S::Resource>(&handle).await;
            status.remove_operation(&id);
        }

        info!(resource = %id, "deleting resource");
        let started = timeout(self.config.delete_timeout(), self.client.delete_async(&id))
            .await
            .map_err(|_| ReconcileError::Timeout {
                call: "delete",
                resource: id.clone(),
            })?;

        match started {
            Ok(Some(mut handle)) => {
                handle.kind = OperationKind::Delete;
                handle.resource = id.clone();
                status.set_operation(handle.clone());
                Ok(DeleteOutcome::Pending(handle))
            }
            Ok(None) => {
                clear_ownership(spec, status);
                info!(resource = %id, "resource deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(ClientError::NotFound(_)) => {
                debug!(resource = %id, "resource already gone");
                clear_ownership(spec, status);
                Ok(DeleteOutcome::Deleted)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Load the owner's status, build the spec from it, run one reconcile
    /// pass and write the status back at the version that was read.
    pub async fn reconcile_persisted<S, F>(
        &self,
        store: &dyn StatusStore,
        owner: &str,
        build: F,
    ) -> Result<Outcome<S::Resource>>
    where
        S: SpecGetter,
        C: RemoteResourceClient<S::Resource>,
        F: FnOnce(&ReconcileStatus) -> Result<S>,
    {
        let loaded = store.load(owner).await?;
        let mut status = loaded.value.clone();
        let spec = build(&status)?;
        let outcome = self.reconcile(&spec, &mut status).await;
        persist(store, owner, &loaded, status).await?;
        outcome
    }

    /// Persisted counterpart of [`Reconciler::delete`].
    pub async fn delete_persisted<S, F>(
        &self,
        store: &dyn StatusStore,
        owner: &str,
        build: F,
    ) -> Result<DeleteOutcome>
    where
        S: SpecGetter,
        C: RemoteResourceClient<S::Resource>,
        F: FnOnce(&ReconcileStatus) -> Result<S>,
    {
        let loaded = store.load(owner).await?;
        let mut status = loaded.value.clone();
        let spec = build(&status)?;
        let outcome = self.delete(&spec, &mut status).await;
        persist(store, owner, &loaded, status).await?;
        outcome
    }

    async fn fetch<R>(&self, id: &ResourceId) -> Result<Option<R>>
    where
        C: RemoteResourceClient<R>,
        R: Send + Sync + 'static,
    {
        match timeout(self.config.get_timeout(), self.client.get(id)).await {
            Err(_) => Err(ReconcileError::Timeout {
                call: "get",
                resource: id.clone(),
            }),
            Ok(Ok(object)) => Ok(Some(object)),
            Ok(Err(ClientError::NotFound(_))) => Ok(None),
            Ok(Err(err)) => Err(err.into()),
        }
    }

    async fn resume<R>(
        &self,
        mut handle: OperationHandle,
        status: &mut ReconcileStatus,
    ) -> Result<Outcome<R>>
    where
        C: RemoteResourceClient<R>,
        R: Send + Sync + 'static,
    {
        let id = handle.resource.clone();
        match self.poller().poll::<R>(&mut handle).await {
            Ok(PollOutcome::InProgress) => {
                status.set_operation(handle.clone());
                Ok(Outcome::Pending(handle))
            }
            Ok(PollOutcome::Succeeded(object)) => {
                status.remove_operation(&id);
                if let Some(pending) = &handle.pending_ownership {
                    status.set_ownership(&pending.key, &pending.record);
                }
                Ok(match object {
                    Some(object) => Outcome::Applied(object),
                    None => Outcome::UpToDate(None),
                })
            }
            Ok(PollOutcome::Failed(err)) => {
                status.remove_operation(&id);
                Err(operation_failed(&handle, err))
            }
            Err(err) => {
                status.set_operation(handle);
                Err(err)
            }
        }
    }

    async fn abandon<R>(&self, handle: &OperationHandle)
    where
        C: RemoteResourceClient<R>,
        R: Send + Sync + 'static,
    {
        warn!(
            resource = %handle.resource,
            kind = %handle.kind,
            token = %handle.token,
            "abandoning in-flight operation for deletion"
        );
        match timeout(self.config.poll_timeout(), self.client.cancel(handle)).await {
            Ok(Ok(true)) => info!(resource = %handle.resource, "operation cancelled"),
            Ok(Ok(false)) => debug!(resource = %handle.resource, "operation left running"),
            Ok(Err(e)) => warn!(resource = %handle.resource, error = %e, "failed to cancel operation"),
            Err(_) => warn!(resource = %handle.resource, "cancel timed out"),
        }
    }
}

fn commit_ownership<S: SpecGetter>(spec: &S, status: &mut ReconcileStatus) {
    if let Some(key) = spec.ownership_key() {
        status.set_ownership(&key, &spec.desired_ownership());
    }
}

fn clear_ownership<S: SpecGetter>(spec: &S, status: &mut ReconcileStatus) {
    if let Some(key) = spec.ownership_key() {
        status.clear_ownership(&key);
    }
}

fn operation_failed(handle: &OperationHandle, err: ClientError) -> ReconcileError {
    ReconcileError::OperationFailed {
        kind: handle.kind,
        resource: handle.resource.clone(),
        message: err.to_string(),
    }
}

async fn persist(
    store: &dyn StatusStore,
    owner: &str,
    loaded: &Versioned<ReconcileStatus>,
    status: ReconcileStatus,
) -> Result<()> {
    if status == loaded.value {
        return Ok(());
    }
    match store.store(owner, loaded.version, status).await {
        Ok(version) => {
            debug!(owner, version, "status stored");
            Ok(())
        }
        Err(err) => {
            warn!(owner, error = %err, "failed to store status, pass will be retried");
            Err(err.into())
        }
    }
}
