use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::object::{NewObject, ObjectId, ObjectMetadata, StoredObject};

/// Errors produced by object store implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No complete object exists under this id (never stored, reaped, or
    /// removed while the read was in flight).
    #[error("object not found: {id}")]
    NotFound { id: String },
    /// An artifact exists but cannot be decoded.
    #[error("object {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
    /// Underlying medium failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// Persistence contract for encrypted objects.
///
/// Implementations must make `put` all-or-nothing from a reader's point of
/// view and keep `delete` idempotent, since the reaper and foreground
/// requests operate on the same store concurrently.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Persist a new object under a freshly allocated id.
    async fn put(&self, object: NewObject) -> Result<ObjectId, StoreError>;

    /// Read every artifact of an object.
    async fn get(&self, id: &ObjectId) -> Result<StoredObject, StoreError>;

    /// Read only the cleartext metadata of an object.
    async fn metadata(&self, id: &ObjectId) -> Result<ObjectMetadata, StoreError>;

    async fn exists(&self, id: &ObjectId) -> Result<bool, StoreError>;

    /// Missing or unreadable metadata counts as expired.
    async fn is_expired(&self, id: &ObjectId, now: DateTime<Utc>) -> bool;

    /// Remove every artifact of an object (idempotent).
    async fn delete(&self, id: &ObjectId) -> Result<(), StoreError>;

    /// Snapshot of the ids currently present, in no particular order.
    async fn list_ids(&self) -> Result<Vec<ObjectId>, StoreError>;
}

/// In-memory object store for tests and smoke runs.
#[derive(Debug, Clone)]
pub struct InMemoryObjectStore {
    inner: Arc<Mutex<HashMap<ObjectId, StoredObject>>>,
    ttl: Duration,
}

impl InMemoryObjectStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::default(),
            ttl,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ObjectId, StoredObject>>, StoreError> {
        self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, object: NewObject) -> Result<ObjectId, StoreError> {
        let mut map = self.lock()?;
        let id = ObjectId::generate();
        map.insert(id, object.with_id(id));
        Ok(id)
    }

    async fn get(&self, id: &ObjectId) -> Result<StoredObject, StoreError> {
        let map = self.lock()?;
        map.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })
    }

    async fn metadata(&self, id: &ObjectId) -> Result<ObjectMetadata, StoreError> {
        self.get(id).await.map(|object| object.metadata)
    }

    async fn exists(&self, id: &ObjectId) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(id))
    }

    async fn is_expired(&self, id: &ObjectId, now: DateTime<Utc>) -> bool {
        match self.metadata(id).await {
            Ok(meta) => meta.is_expired(self.ttl, now),
            Err(_) => true,
        }
    }

    async fn delete(&self, id: &ObjectId) -> Result<(), StoreError> {
        self.lock()?.remove(id);
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<ObjectId>, StoreError> {
        Ok(self.lock()?.keys().copied().collect())
    }
}
