//! The durable tier as the cache sees it.
//!
//! [`L2Store`] wraps an injected [`StorageEngine`] and keeps the set of opened
//! namespaces. Nothing here panics or blocks indefinitely:
//!
//! - opening is idempotent and bounded by `open_timeout`
//! - an engine that has not been bootstrapped yields `OpenError::EngineNotReady`
//! - every data operation on an unopened namespace yields `StorageError::NotOpen`
//!
//! Expired rows are filtered on read. Deleting them is a separate
//! [`L2Store::purge_expired`] call, so the caller can order it with writes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::now_millis;
use super::traits::{BoxHandle, OpenError, StorageEngine, StorageError, StoredValue};

pub struct L2Store {
    engine: Arc<dyn StorageEngine>,
    boxes: RwLock<HashMap<String, BoxHandle>>,
    open_lock: Mutex<()>,
    open_timeout: Duration,
}

impl L2Store {
    pub fn new(engine: Arc<dyn StorageEngine>, open_timeout: Duration) -> Self {
        Self {
            engine,
            boxes: RwLock::new(HashMap::new()),
            open_lock: Mutex::new(()),
            open_timeout,
        }
    }

    #[must_use]
    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    #[must_use]
    pub fn engine_ready(&self) -> bool {
        self.engine.is_ready()
    }

    /// Open a namespace, or return the handle from an earlier open.
    #[tracing::instrument(skip(self), fields(engine = self.engine.name()))]
    pub async fn open(&self, namespace: &str) -> Result<BoxHandle, OpenError> {
        if let Some(handle) = self.handle(namespace) {
            return Ok(handle);
        }
        if !self.engine.is_ready() {
            debug!(namespace, "Storage engine not bootstrapped");
            return Err(OpenError::EngineNotReady);
        }

        let attempt = async {
            let _guard = self.open_lock.lock().await;
            // Another caller may have finished the same open while we waited.
            if let Some(handle) = self.handle(namespace) {
                return Ok(handle);
            }
            let handle = self.engine.open_box(namespace).await?;
            self.boxes.write().insert(namespace.to_string(), handle.clone());
            Ok::<_, StorageError>(handle)
        };

        match tokio::time::timeout(self.open_timeout, attempt).await {
            Ok(Ok(handle)) => {
                info!(namespace, "L2 namespace opened");
                Ok(handle)
            }
            Ok(Err(StorageError::EngineNotReady)) => Err(OpenError::EngineNotReady),
            Ok(Err(e)) => {
                warn!(namespace, error = %e, "L2 namespace open failed");
                Err(OpenError::Backend {
                    namespace: namespace.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                warn!(namespace, timeout = ?self.open_timeout, "L2 namespace open timed out");
                Err(OpenError::Timeout {
                    namespace: namespace.to_string(),
                    timeout: self.open_timeout,
                })
            }
        }
    }

    /// Whether the engine is usable and at least one namespace is open.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.engine.is_ready() && !self.boxes.read().is_empty()
    }

    #[must_use]
    pub fn is_open(&self, namespace: &str) -> bool {
        self.boxes.read().contains_key(namespace)
    }

    #[must_use]
    pub fn open_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.boxes.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Read a live value. Expired rows read as `None` and are left in place;
    /// see [`purge_expired`](Self::purge_expired).
    pub async fn read(&self, namespace: &str, key: &str) -> Result<Option<StoredValue>, StorageError> {
        Ok(self
            .read_row(namespace, key)
            .await?
            .filter(|value| !value.is_expired_at(now_millis())))
    }

    /// Read a row as stored, expired or not.
    pub async fn read_row(&self, namespace: &str, key: &str) -> Result<Option<StoredValue>, StorageError> {
        self.require(namespace)?.get(key).await
    }

    /// Delete `key` only if the row stored right now is expired. Returns
    /// whether a row was removed.
    ///
    /// Callers serialize this with writes to the same key; the re-read then
    /// guarantees a fresh row is never removed.
    pub async fn purge_expired(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let handle = self.require(namespace)?;
        match handle.get(key).await? {
            Some(value) if value.is_expired_at(now_millis()) => {
                debug!(namespace, key, "Purging expired L2 entry");
                handle.delete(key).await
            }
            _ => Ok(false),
        }
    }

    pub async fn write(&self, namespace: &str, key: &str, value: &StoredValue) -> Result<(), StorageError> {
        self.require(namespace)?.put(key, value).await
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        self.require(namespace)?.delete(key).await
    }

    pub async fn scan_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        self.require(namespace)?.keys().await
    }

    pub async fn count(&self, namespace: &str) -> Result<u64, StorageError> {
        self.require(namespace)?.count().await
    }

    pub async fn clear(&self, namespace: &str) -> Result<u64, StorageError> {
        self.require(namespace)?.clear().await
    }

    /// Clear every opened namespace.
    pub async fn clear_all(&self) -> Result<u64, StorageError> {
        self.clear_all_except(&[]).await
    }

    /// Clear every opened namespace except those in `keep`.
    pub async fn clear_all_except(&self, keep: &[&str]) -> Result<u64, StorageError> {
        let handles: Vec<BoxHandle> = self
            .boxes
            .read()
            .iter()
            .filter(|(name, _)| !keep.contains(&name.as_str()))
            .map(|(_, handle)| handle.clone())
            .collect();

        let mut removed = 0;
        for handle in handles {
            removed += handle.clear().await?;
        }
        Ok(removed)
    }

    /// Forget all handles and release the engine. Later operations see
    /// `NotOpen` until a namespace is opened again.
    pub async fn close(&self) {
        self.boxes.write().clear();
        self.engine.close().await;
    }

    fn handle(&self, namespace: &str) -> Option<BoxHandle> {
        self.boxes.read().get(namespace).cloned()
    }

    fn require(&self, namespace: &str) -> Result<BoxHandle, StorageError> {
        self.handle(namespace)
            .ok_or_else(|| StorageError::NotOpen(namespace.to_string()))
    }
}
