//! Object storage port shared by every backend.
//!
//! The pipeline only ever needs two operations: read a source object with its
//! content type, and write a derivative. Errors are classified so callers can
//! tell a retryable hiccup from a permanent refusal.

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, sync::Mutex};
use thiserror::Error;

use crate::errors::ErrorKind;
use crate::models::object::StoredObject;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },
    #[error("access denied to `{bucket}/{key}`: {reason}")]
    AccessDenied {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("request for `{bucket}/{key}` rejected: {reason}")]
    InvalidRequest {
        bucket: String,
        key: String,
        reason: String,
    },
    #[error("transient I/O failure on `{bucket}/{key}`: {reason}")]
    Transient {
        bucket: String,
        key: String,
        reason: String,
    },
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn access_denied(bucket: &str, key: &str, reason: impl Into<String>) -> Self {
        StoreError::AccessDenied {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_request(bucket: &str, key: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidRequest {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn transient(bucket: &str, key: &str, reason: impl Into<String>) -> Self {
        StoreError::Transient {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::AccessDenied { .. } => ErrorKind::AccessDenied,
            StoreError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            StoreError::Transient { .. } => ErrorKind::TransientIo,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Get/put access to binary objects addressed by `(bucket, key)`.
///
/// Implementations are shared across concurrently processed records and must
/// be safe to call from many tasks at once.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short backend name for logs and readiness output.
    fn backend(&self) -> &'static str;

    async fn fetch(&self, bucket: &str, key: &str) -> StoreResult<StoredObject>;

    /// Write `bytes` under `key`, replacing any existing object.
    async fn store(&self, bucket: &str, key: &str, bytes: Bytes, content_type: &str)
    -> StoreResult<()>;

    /// Cheap reachability check used by the readiness probe.
    async fn probe(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// In-process store used for tests and dry runs.
///
/// Test builds can inject transient failures or access denials per key so
/// retry behaviour and error classification run without a network.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    #[cfg(test)]
    faults: faults::Faults,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Bytes>, content_type: &str) {
        let object = StoredObject::new(bytes, Some(content_type.to_string()));
        lock(&self.objects).insert((bucket.to_string(), key.to_string()), object);
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, bucket: &str, key: &str) -> StoreResult<StoredObject> {
        #[cfg(test)]
        self.faults.on_fetch(bucket, key)?;

        self.get(bucket, key)
            .ok_or_else(|| StoreError::not_found(bucket, key))
    }

    async fn store(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> StoreResult<()> {
        #[cfg(test)]
        self.faults.on_store(bucket, key)?;

        self.insert(bucket, key, bytes, content_type);
        Ok(())
    }
}

#[cfg(test)]
mod faults {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, Debug)]
    enum Fault {
        /// Fail this many more calls, then recover.
        Transient(u32),
        /// Refuse every call.
        Denied,
    }

    #[derive(Default)]
    pub(super) struct Faults {
        fetch: Mutex<HashMap<String, Fault>>,
        store: Mutex<HashMap<String, Fault>>,
        fetch_calls: AtomicUsize,
        store_calls: AtomicUsize,
    }

    impl Faults {
        pub(super) fn on_fetch(&self, bucket: &str, key: &str) -> StoreResult<()> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            trip(&self.fetch, bucket, key, "fetch")
        }

        pub(super) fn on_store(&self, bucket: &str, key: &str) -> StoreResult<()> {
            self.store_calls.fetch_add(1, Ordering::SeqCst);
            trip(&self.store, bucket, key, "store")
        }
    }

    /// Fire the fault registered for `key`, if any is still armed.
    fn trip(
        faults: &Mutex<HashMap<String, Fault>>,
        bucket: &str,
        key: &str,
        operation: &str,
    ) -> StoreResult<()> {
        let mut faults = lock(faults);
        match faults.get_mut(key) {
            Some(Fault::Denied) => Err(StoreError::access_denied(
                bucket,
                key,
                format!("injected {} denial", operation),
            )),
            Some(Fault::Transient(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::transient(
                    bucket,
                    key,
                    format!("injected {} failure", operation),
                ))
            }
            _ => Ok(()),
        }
    }

    impl MemoryObjectStore {
        pub fn len(&self) -> usize {
            lock(&self.objects).len()
        }

        /// Make the next `times` fetches of `key` fail transiently.
        pub fn fail_fetches(&self, key: &str, times: u32) {
            lock(&self.faults.fetch).insert(key.to_string(), Fault::Transient(times));
        }

        /// Make the next `times` stores to `key` fail transiently.
        pub fn fail_stores(&self, key: &str, times: u32) {
            lock(&self.faults.store).insert(key.to_string(), Fault::Transient(times));
        }

        /// Refuse every fetch of `key` with an access denial.
        pub fn deny_fetches(&self, key: &str) {
            lock(&self.faults.fetch).insert(key.to_string(), Fault::Denied);
        }

        pub fn fetch_calls(&self) -> usize {
            self.faults.fetch_calls.load(Ordering::SeqCst)
        }

        pub fn store_calls(&self) -> usize {
            self.faults.store_calls.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips_and_overwrites() {
        let store = MemoryObjectStore::new();
        store
            .store("b", "u/resized/a.png", Bytes::from_static(b"one"), "image/png")
            .await
            .unwrap();
        store
            .store("b", "u/resized/a.png", Bytes::from_static(b"two"), "image/png")
            .await
            .unwrap();

        let object = store.fetch("b", "u/resized/a.png").await.unwrap();
        assert_eq!(object.bytes, Bytes::from_static(b"two"));
        assert_eq!(object.content_type.as_deref(), Some("image/png"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let err = store.fetch("b", "u/uploads/nope.png").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn injected_faults_are_transient_and_run_out() {
        let store = MemoryObjectStore::new();
        store.insert("b", "k/uploads/x.png", b"data".to_vec(), "image/png");
        store.fail_fetches("k/uploads/x.png", 2);

        assert!(store.fetch("b", "k/uploads/x.png").await.unwrap_err().is_transient());
        assert!(store.fetch("b", "k/uploads/x.png").await.unwrap_err().is_transient());
        assert!(store.fetch("b", "k/uploads/x.png").await.is_ok());
        assert_eq!(store.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn denied_fetches_are_permanent() {
        let store = MemoryObjectStore::new();
        store.insert("b", "k/uploads/x.png", b"data".to_vec(), "image/png");
        store.deny_fetches("k/uploads/x.png");

        for _ in 0..2 {
            let err = store.fetch("b", "k/uploads/x.png").await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessDenied);
            assert!(!err.is_transient());
        }
    }
}
