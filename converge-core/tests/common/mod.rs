//! Test helpers for converge-core integration tests.
//!
//! [`FakeCloud`] is an in-memory provider: it stores objects by id, runs
//! writes as long-running operations that finish after a configurable number
//! of polls, and can be told to fail or hang. Like a real provider it can
//! fill in defaults on the objects it stores.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_core::status::{ReconcileStatus, StatusStore, StoreError, Versioned};
use converge_core::{
    ClientError, ClientResult, MemoryStatusStore, OperationHandle, OperationKind,
    RemoteResourceClient, ResourceId, Submission,
};
use tokio::sync::Mutex;

struct FakeOperation<R> {
    id: ResourceId,
    kind: OperationKind,
    payload: Option<R>,
    remaining_polls: u32,
    failure: Option<String>,
}

type Decorator<R> = Box<dyn Fn(&mut R) + Send + Sync>;

struct State<R> {
    objects: Mutex<HashMap<ResourceId, R>>,
    operations: Mutex<HashMap<String, FakeOperation<R>>>,
    /// Polls an operation needs before it reports done. Zero completes
    /// writes synchronously.
    polls_to_complete: AtomicU32,
    fail_next: Mutex<Option<String>>,
    /// Applied to every object the provider accepts.
    provider_defaults: std::sync::Mutex<Option<Decorator<R>>>,
    hang_get: AtomicBool,
    hang_poll: AtomicBool,
    cancellable: AtomicBool,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    cancels: AtomicUsize,
}

/// In-memory provider shared between clones.
pub struct FakeCloud<R> {
    state: Arc<State<R>>,
}

impl<R> Clone for FakeCloud<R> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<R: Clone + Send + Sync + 'static> FakeCloud<R> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                objects: Mutex::new(HashMap::new()),
                operations: Mutex::new(HashMap::new()),
                polls_to_complete: AtomicU32::new(0),
                fail_next: Mutex::new(None),
                provider_defaults: std::sync::Mutex::new(None),
                hang_get: AtomicBool::new(false),
                hang_poll: AtomicBool::new(false),
                cancellable: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
            }),
        }
    }

    /// Writes return an operation that is done after `polls` not-done polls.
    pub fn with_async_operations(self, polls: u32) -> Self {
        self.state.polls_to_complete.store(polls, Ordering::SeqCst);
        self
    }

    /// Stored objects get provider-filled fields set by `fill`.
    pub fn with_provider_defaults(self, fill: impl Fn(&mut R) + Send + Sync + 'static) -> Self {
        *self.state.provider_defaults.lock().unwrap() = Some(Box::new(fill));
        self
    }

    fn accept(&self, mut object: R) -> R {
        if let Some(fill) = self.state.provider_defaults.lock().unwrap().as_ref() {
            fill(&mut object);
        }
        object
    }

    pub fn set_cancellable(&self, cancellable: bool) {
        self.state.cancellable.store(cancellable, Ordering::SeqCst);
    }

    /// The next submitted operation ends in a terminal failure.
    pub async fn fail_next_operation(&self, message: &str) {
        *self.state.fail_next.lock().await = Some(message.to_string());
    }

    pub fn hang_get(&self, hang: bool) {
        self.state.hang_get.store(hang, Ordering::SeqCst);
    }

    pub fn hang_poll(&self, hang: bool) {
        self.state.hang_poll.store(hang, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.state.deletes.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.state.cancels.load(Ordering::SeqCst)
    }

    pub async fn object(&self, id: &ResourceId) -> Option<R> {
        self.state.objects.lock().await.get(id).cloned()
    }

    pub async fn insert(&self, id: ResourceId, object: R) {
        self.state.objects.lock().await.insert(id, object);
    }

    /// Modify a stored object as another tool would.
    pub async fn edit(&self, id: &ResourceId, f: impl FnOnce(&mut R)) {
        if let Some(object) = self.state.objects.lock().await.get_mut(id) {
            f(object);
        }
    }

    pub async fn pending_operations(&self) -> usize {
        self.state.operations.lock().await.len()
    }

    async fn start(&self, id: &ResourceId, kind: OperationKind, payload: Option<R>) -> OperationHandle {
        let token = uuid::Uuid::new_v4().to_string();
        let failure = self.state.fail_next.lock().await.take();
        self.state.operations.lock().await.insert(
            token.clone(),
            FakeOperation {
                id: id.clone(),
                kind,
                payload,
                remaining_polls: self.state.polls_to_complete.load(Ordering::SeqCst),
                failure,
            },
        );
        OperationHandle::new(token, kind, id.clone())
    }
}

async fn hang() {
    tokio::time::sleep(Duration::from_secs(3600)).await;
}

#[async_trait]
impl<R: Clone + Send + Sync + 'static> RemoteResourceClient<R> for FakeCloud<R> {
    async fn get(&self, id: &ResourceId) -> ClientResult<R> {
        if self.state.hang_get.load(Ordering::SeqCst) {
            hang().await;
        }
        self.object(id)
            .await
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }

    async fn create_or_update_async(&self, id: &ResourceId, payload: R) -> ClientResult<Submission<R>> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let kind = if self.object(id).await.is_some() {
            OperationKind::Update
        } else {
            OperationKind::Create
        };
        if self.state.polls_to_complete.load(Ordering::SeqCst) == 0 {
            if let Some(message) = self.state.fail_next.lock().await.take() {
                return Err(ClientError::Transport(message));
            }
            let object = self.accept(payload);
            self.insert(id.clone(), object.clone()).await;
            return Ok(Submission::Completed(object));
        }
        Ok(Submission::Accepted(self.start(id, kind, Some(payload)).await))
    }

    async fn delete_async(&self, id: &ResourceId) -> ClientResult<Option<OperationHandle>> {
        self.state.deletes.fetch_add(1, Ordering::SeqCst);
        if self.object(id).await.is_none() {
            return Err(ClientError::NotFound(id.to_string()));
        }
        if self.state.polls_to_complete.load(Ordering::SeqCst) == 0 {
            self.state.objects.lock().await.remove(id);
            return Ok(None);
        }
        Ok(Some(self.start(id, OperationKind::Delete, None).await))
    }

    async fn is_done(&self, handle: &OperationHandle) -> ClientResult<bool> {
        if self.state.hang_poll.load(Ordering::SeqCst) {
            hang().await;
        }
        let mut operations = self.state.operations.lock().await;
        let Some(op) = operations.get_mut(&handle.token) else {
            return Err(ClientError::NotFound(handle.token.clone()));
        };
        if op.remaining_polls > 0 {
            op.remaining_polls -= 1;
            return Ok(false);
        }
        if let Some(message) = op.failure.clone() {
            operations.remove(&handle.token);
            return Err(ClientError::OperationFailed {
                token: handle.token.clone(),
                message,
            });
        }
        let mut objects = self.state.objects.lock().await;
        match (op.kind, op.payload.clone()) {
            (OperationKind::Delete, _) => {
                objects.remove(&op.id);
                operations.remove(&handle.token);
            }
            (_, Some(payload)) => {
                let object = self.accept(payload);
                op.payload = Some(object.clone());
                objects.insert(op.id.clone(), object);
            }
            (_, None) => {}
        }
        Ok(true)
    }

    async fn result(&self, handle: &OperationHandle) -> ClientResult<R> {
        let mut operations = self.state.operations.lock().await;
        let op = operations
            .remove(&handle.token)
            .ok_or_else(|| ClientError::NotFound(handle.token.clone()))?;
        op.payload
            .ok_or_else(|| ClientError::NotFound(op.id.to_string()))
    }

    async fn cancel(&self, handle: &OperationHandle) -> ClientResult<bool> {
        self.state.cancels.fetch_add(1, Ordering::SeqCst);
        if !self.state.cancellable.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self
            .state
            .operations
            .lock()
            .await
            .remove(&handle.token)
            .is_some())
    }
}

/// Status store that lets a competing writer commit between a pass's load
/// and its store, once.
pub struct RacingStore {
    inner: MemoryStatusStore,
    race: AtomicBool,
}

impl RacingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStatusStore::new(),
            race: AtomicBool::new(false),
        }
    }

    /// The next load is followed by a concurrent write.
    pub fn race_next(&self) {
        self.race.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryStatusStore {
        &self.inner
    }
}

#[async_trait]
impl StatusStore for RacingStore {
    async fn load(&self, owner: &str) -> Result<Versioned<ReconcileStatus>, StoreError> {
        let loaded = self.inner.load(owner).await?;
        if self.race.swap(false, Ordering::SeqCst) {
            let mut competing = loaded.value.clone();
            competing
                .annotations
                .insert("touched-by".to_string(), "someone-else".to_string());
            self.inner.store(owner, loaded.version, competing).await?;
        }
        Ok(loaded)
    }

    async fn store(
        &self,
        owner: &str,
        expected_version: u64,
        status: ReconcileStatus,
    ) -> Result<u64, StoreError> {
        self.inner.store(owner, expected_version, status).await
    }
}
