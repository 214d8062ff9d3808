//! Persisted per-owner state: ownership annotations and in-flight operations.
//!
//! The status lives on the owning custom resource and is read-modify-written
//! once per pass. Writes carry the version that was read; a store must reject
//! the write if someone else committed in between.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::operation::OperationHandle;
use crate::ownership::OwnershipRecord;
use crate::resource::ResourceId;

/// Annotations and operation handles of one owning object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStatus {
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub operations: Vec<OperationHandle>,
}

impl ReconcileStatus {
    /// Decode the ownership record stored under `key`, empty when absent.
    pub fn ownership(&self, key: &str) -> Result<OwnershipRecord> {
        match self.annotations.get(key) {
            Some(value) => OwnershipRecord::from_annotation(key, value),
            None => Ok(OwnershipRecord::default()),
        }
    }

    pub fn set_ownership(&mut self, key: &str, record: &OwnershipRecord) {
        self.annotations
            .insert(key.to_string(), record.to_annotation());
    }

    pub fn clear_ownership(&mut self, key: &str) {
        self.annotations.remove(key);
    }

    /// The in-flight operation for `resource`, if any.
    pub fn operation(&self, resource: &ResourceId) -> Option<&OperationHandle> {
        self.operations.iter().find(|op| &op.resource == resource)
    }

    /// Store `handle`, replacing any handle for the same resource.
    pub fn set_operation(&mut self, handle: OperationHandle) {
        self.operations.retain(|op| op.resource != handle.resource);
        self.operations.push(handle);
    }

    pub fn remove_operation(&mut self, resource: &ResourceId) -> Option<OperationHandle> {
        let idx = self.operations.iter().position(|op| &op.resource == resource)?;
        Some(self.operations.remove(idx))
    }
}

/// Errors that can occur during status store operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Storage for owner status with optimistic concurrency.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Read the status of `owner`. Unknown owners read as empty at version 0.
    async fn load(&self, owner: &str) -> std::result::Result<Versioned<ReconcileStatus>, StoreError>;

    /// Write `status` if the stored version is still `expected_version`.
    /// Returns the new version.
    async fn store(
        &self,
        owner: &str,
        expected_version: u64,
        status: ReconcileStatus,
    ) -> std::result::Result<u64, StoreError>;
}

/// In-process status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: RwLock<HashMap<String, Versioned<ReconcileStatus>>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load(&self, owner: &str) -> std::result::Result<Versioned<ReconcileStatus>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(owner).cloned().unwrap_or(Versioned {
            version: 0,
            value: ReconcileStatus::default(),
        }))
    }

    async fn store(
        &self,
        owner: &str,
        expected_version: u64,
        status: ReconcileStatus,
    ) -> std::result::Result<u64, StoreError> {
        let mut entries = self.entries.write().await;
        let actual = entries.get(owner).map(|e| e.version).unwrap_or(0);
        if actual != expected_version {
            return Err(StoreError::VersionMismatch {
                expected: expected_version,
                actual,
            });
        }
        let version = actual + 1;
        entries.insert(
            owner.to_string(),
            Versioned {
                version,
                value: status,
            },
        );
        Ok(version)
    }
}
