use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("namespace '{0}' is not open")]
    NotOpen(String),
    #[error("storage engine has not been bootstrapped")]
    EngineNotReady,
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt record for '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

/// Why a namespace could not be opened. Every variant means "run without L2".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("storage engine not ready")]
    EngineNotReady,
    #[error("opening namespace '{namespace}' timed out after {timeout:?}")]
    Timeout { namespace: String, timeout: Duration },
    #[error("failed to open namespace '{namespace}': {reason}")]
    Backend { namespace: String, reason: String },
}

/// A persisted value with its expiry metadata (epoch millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub payload: Vec<u8>,
    pub stored_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl StoredValue {
    #[must_use]
    pub fn new(payload: Vec<u8>, ttl: Option<Duration>) -> Self {
        let now = super::now_millis();
        let expires_at = ttl.map(|t| now.saturating_add(i64::try_from(t.as_millis()).unwrap_or(i64::MAX)));
        Self {
            payload,
            stored_at: now,
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| now_ms >= at)
    }

    /// TTL left at `now_ms`; `None` means no expiry.
    #[must_use]
    pub fn remaining_ttl_at(&self, now_ms: i64) -> Option<Duration> {
        let at = self.expires_at?;
        let left = at.saturating_sub(now_ms).max(0);
        Some(Duration::from_millis(left.unsigned_abs()))
    }
}

/// Handle to an opened namespace.
pub type BoxHandle = Arc<dyn NamespaceBox>;

/// A named persistent collection of key → bytes.
#[async_trait]
pub trait NamespaceBox: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;
    async fn put(&self, key: &str, value: &StoredValue) -> Result<(), StorageError>;
    /// Returns whether a row was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
    /// Returns the number of rows removed.
    async fn clear(&self) -> Result<u64, StorageError>;

    async fn count(&self) -> Result<u64, StorageError> {
        Ok(self.keys().await?.len() as u64)
    }
}

/// The storage engine capability injected into [`super::L2Store`].
///
/// `is_ready` reports whether the process-wide bootstrap has run; opening
/// before that must fail with [`StorageError::EngineNotReady`], never panic.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    async fn open_box(&self, namespace: &str) -> Result<BoxHandle, StorageError>;

    /// Release engine resources. Boxes opened earlier stop working.
    async fn close(&self) {}
}
