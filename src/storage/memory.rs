//! In-process storage engine.
//!
//! Data lives as long as the engine value, so two caches sharing one
//! `Arc<MemoryEngine>` see each other's writes the way two process runs
//! would see a database file. Bootstrap state and open/write failures are
//! switchable at runtime for exercising degraded paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{BoxHandle, NamespaceBox, StorageEngine, StorageError, StoredValue};

pub struct MemoryEngine {
    ready: AtomicBool,
    fail_opens: AtomicBool,
    hang_opens: AtomicBool,
    fail_io: Arc<AtomicBool>,
    io_delay_ms: Arc<AtomicU64>,
    opens: AtomicU64,
    boxes: DashMap<String, Arc<MemoryBox>>,
}

impl MemoryEngine {
    /// A bootstrapped engine.
    #[must_use]
    pub fn new() -> Self {
        let engine = Self::unbootstrapped();
        engine.bootstrap();
        engine
    }

    /// An engine whose global bootstrap has not happened yet.
    #[must_use]
    pub fn unbootstrapped() -> Self {
        Self {
            ready: AtomicBool::new(false),
            fail_opens: AtomicBool::new(false),
            hang_opens: AtomicBool::new(false),
            fail_io: Arc::new(AtomicBool::new(false)),
            io_delay_ms: Arc::new(AtomicU64::new(0)),
            opens: AtomicU64::new(0),
            boxes: DashMap::new(),
        }
    }

    pub fn bootstrap(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Make `open_box` return a backend error.
    pub fn set_fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::Release);
    }

    /// Make `open_box` never complete.
    pub fn set_hang_opens(&self, hang: bool) {
        self.hang_opens.store(hang, Ordering::Release);
    }

    /// Make reads and writes on every box fail.
    pub fn set_fail_io(&self, fail: bool) {
        self.fail_io.store(fail, Ordering::Release);
    }

    /// Make every `get` and `put` sleep for `delay` after touching the row.
    /// A reader then acts on a snapshot that may be stale by the time it
    /// returns.
    pub fn set_io_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.io_delay_ms.store(ms, Ordering::Release);
    }

    /// Number of `open_box` calls that reached the engine.
    #[must_use]
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Acquire)
    }

    /// Raw row count in a namespace, bypassing the cache.
    #[must_use]
    pub fn len(&self, namespace: &str) -> usize {
        self.boxes.get(namespace).map_or(0, |b| b.data.len())
    }

    /// Raw row, bypassing the cache and TTL filtering.
    #[must_use]
    pub fn row(&self, namespace: &str, key: &str) -> Option<StoredValue> {
        self.boxes
            .get(namespace)
            .and_then(|b| b.data.get(key).map(|r| r.value().clone()))
    }

    #[must_use]
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn open_box(&self, namespace: &str) -> Result<BoxHandle, StorageError> {
        self.opens.fetch_add(1, Ordering::AcqRel);
        if !self.is_ready() {
            return Err(StorageError::EngineNotReady);
        }
        if self.hang_opens.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        if self.fail_opens.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!(
                "injected open failure for '{namespace}'"
            )));
        }
        let handle: BoxHandle = self
            .boxes
            .entry(namespace.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryBox {
                    name: namespace.to_string(),
                    data: DashMap::new(),
                    fail_io: Arc::clone(&self.fail_io),
                    io_delay_ms: Arc::clone(&self.io_delay_ms),
                })
            })
            .clone();
        Ok(handle)
    }
}

pub struct MemoryBox {
    name: String,
    data: DashMap<String, StoredValue>,
    fail_io: Arc<AtomicBool>,
    io_delay_ms: Arc<AtomicU64>,
}

impl MemoryBox {
    fn check_io(&self) -> Result<(), StorageError> {
        if self.fail_io.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!(
                "injected I/O failure in '{}'",
                self.name
            )));
        }
        Ok(())
    }

    async fn io_delay(&self) {
        let delay = self.io_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[async_trait]
impl NamespaceBox for MemoryBox {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        self.check_io()?;
        let row = self.data.get(key).map(|r| r.value().clone());
        self.io_delay().await;
        Ok(row)
    }

    async fn put(&self, key: &str, value: &StoredValue) -> Result<(), StorageError> {
        self.check_io()?;
        self.data.insert(key.to_string(), value.clone());
        self.io_delay().await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.check_io()?;
        Ok(self.data.remove(key).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_io()?;
        let mut keys: Vec<String> = self.data.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        self.check_io()?;
        let removed = self.data.len() as u64;
        self.data.clear();
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.check_io()?;
        Ok(self.data.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(bytes: &[u8]) -> StoredValue {
        StoredValue::new(bytes.to_vec(), None)
    }

    #[tokio::test]
    async fn test_unbootstrapped_engine_refuses_open() {
        let engine = MemoryEngine::unbootstrapped();
        assert!(!engine.is_ready());
        let result = engine.open_box("ns").await;
        assert!(matches!(result, Err(StorageError::EngineNotReady)));

        engine.bootstrap();
        assert!(engine.open_box("ns").await.is_ok());
        assert_eq!(engine.open_count(), 2);
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let engine = MemoryEngine::new();
        let ns = engine.open_box("ns").await.unwrap();

        ns.put("k", &value(b"v")).await.unwrap();
        assert_eq!(ns.get("k").await.unwrap().unwrap().payload, b"v");
        assert!(ns.delete("k").await.unwrap());
        assert!(!ns.delete("k").await.unwrap());
        assert!(ns.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let engine = MemoryEngine::new();
        let ns = engine.open_box("ns").await.unwrap();
        ns.put("k", &value(b"1")).await.unwrap();
        ns.put("k", &value(b"2")).await.unwrap();
        assert_eq!(ns.count().await.unwrap(), 1);
        assert_eq!(ns.get("k").await.unwrap().unwrap().payload, b"2");
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated_and_shared_across_opens() {
        let engine = MemoryEngine::new();
        let a = engine.open_box("a").await.unwrap();
        let b = engine.open_box("b").await.unwrap();
        a.put("k", &value(b"a")).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());

        let a_again = engine.open_box("a").await.unwrap();
        assert_eq!(a_again.keys().await.unwrap(), vec!["k".to_string()]);
        assert_eq!(engine.len("a"), 1);
        assert!(engine.is_empty("b"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let engine = MemoryEngine::new();
        let ns = engine.open_box("ns").await.unwrap();

        engine.set_fail_io(true);
        assert!(matches!(ns.put("k", &value(b"v")).await, Err(StorageError::Backend(_))));
        engine.set_fail_io(false);
        ns.put("k", &value(b"v")).await.unwrap();

        engine.set_fail_opens(true);
        assert!(matches!(engine.open_box("other").await, Err(StorageError::Backend(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let engine = MemoryEngine::new();
        let ns = engine.open_box("ns").await.unwrap();
        for i in 0..5 {
            ns.put(&format!("k{i}"), &value(b"v")).await.unwrap();
        }
        assert_eq!(ns.clear().await.unwrap(), 5);
        assert_eq!(ns.count().await.unwrap(), 0);
    }
}
