// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Unified cache manager.
//!
//! The [`UnifiedCacheManager`] is the single entry point callers use. It ties
//! together:
//! - key normalization ([`KeyNormalizer`])
//! - the migration ledger ([`CacheKeyMigrationAdapter`])
//! - L1, the bounded in-memory LRU ([`L1MemoryCache`])
//! - L2, the durable namespaced store ([`L2Store`])
//!
//! # Lifecycle
//!
//! ```text
//! Constructed → Initializing → Ready ──────┐
//!                    └───────→ Degraded ───┴→ Disposed
//! ```
//!
//! L1 exists from `new()` on, so every operation is safe before
//! `initialize()` runs. Until L2 is `Ready` the manager serves from L1 only.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use unified_cache::{CacheConfig, ManagerState, SqlEngine, UnifiedCacheManager};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), unified_cache::CacheError> {
//! SqlEngine::bootstrap();
//! let engine = Arc::new(SqlEngine::sqlite("cache.db"));
//! let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
//!
//! cache.initialize().await;
//! assert!(matches!(cache.state(), ManagerState::Ready | ManagerState::Degraded));
//!
//! cache.set("AAPL|period=1d", vec![189.5f64, 190.25], Some(Duration::from_secs(300)))?;
//! let closes: Option<Vec<f64>> = cache.get("aapl?period=1d").await?;
//! assert!(closes.is_some());
//!
//! cache.dispose().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod flush;
mod lifecycle;
mod migrate_api;
mod types;

pub use types::{CacheStats, LifecycleSignal, ManagerState, MigrationReport};

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::codec::{JsonCodec, ValueCodec};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{CacheKey, KeyNormalizer};
use crate::l1::L1MemoryCache;
use crate::migration::CacheKeyMigrationAdapter;
use crate::storage::{now_millis, L2Store, StorageEngine};

use flush::WriteTracker;

/// Two-tier cache: bounded memory in front of a durable store.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. L1 sits behind one mutex that is
/// never held across an `.await`.
pub struct UnifiedCacheManager<C: ValueCodec = JsonCodec> {
    pub(super) config: CacheConfig,
    pub(super) normalizer: KeyNormalizer,
    pub(super) codec: C,

    /// L1: in-memory LRU
    pub(super) l1: Mutex<L1MemoryCache>,

    /// L2: durable store, shared with spawned writes
    pub(super) l2: Arc<L2Store>,

    pub(super) migrations: Arc<CacheKeyMigrationAdapter>,

    /// Manager state (broadcast to watchers)
    pub(super) state: watch::Sender<ManagerState>,
    pub(super) state_rx: watch::Receiver<ManagerState>,

    /// Serializes initialize/dispose
    pub(super) init_lock: tokio::sync::Mutex<()>,

    pub(super) writes: Arc<WriteTracker>,

    pub(super) hits: AtomicU64,
    pub(super) misses: AtomicU64,
}

impl UnifiedCacheManager<JsonCodec> {
    /// Create a manager storing L2 values as JSON.
    ///
    /// The manager starts in `Constructed` with L1 ready. Call
    /// [`initialize()`](Self::initialize) to bring up L2.
    pub fn new(config: CacheConfig, engine: Arc<dyn StorageEngine>) -> Self {
        Self::with_codec(config, engine, JsonCodec)
    }
}

impl<C: ValueCodec> UnifiedCacheManager<C> {
    /// Create a manager with a custom L2 value codec.
    ///
    /// Invalid config fields are replaced by their defaults with a warning.
    pub fn with_codec(config: CacheConfig, engine: Arc<dyn StorageEngine>, codec: C) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Invalid cache config, using defaults for invalid fields");
        }
        let config = config.sanitized();

        let (state_tx, state_rx) = watch::channel(ManagerState::Constructed);
        let l2 = Arc::new(L2Store::new(engine, config.l2_open_timeout()));
        let migrations = Arc::new(CacheKeyMigrationAdapter::new(
            Arc::clone(&l2),
            config.ledger_namespace.clone(),
        ));

        debug!(
            l1_max_entries = config.l1_max_entries,
            l1_max_bytes = config.l1_max_bytes,
            codec = codec.name(),
            engine = l2.engine_name(),
            "Cache manager constructed"
        );

        Self {
            normalizer: KeyNormalizer::new(&config.legacy_prefixes),
            l1: Mutex::new(L1MemoryCache::new(config.l1_max_entries, config.l1_max_bytes)),
            l2,
            migrations,
            codec,
            state: state_tx,
            state_rx,
            init_lock: tokio::sync::Mutex::new(()),
            writes: Arc::new(WriteTracker::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }

    /// Whether L2 is serving.
    #[must_use]
    pub fn l2_available(&self) -> bool {
        self.state().l2_available()
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[must_use]
    pub fn normalizer(&self) -> &KeyNormalizer {
        &self.normalizer
    }

    #[must_use]
    pub fn migrations(&self) -> &CacheKeyMigrationAdapter {
        &self.migrations
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Core API: get / set / invalidate
    // ═══════════════════════════════════════════════════════════════════════

    /// Get a value from the default namespace.
    pub async fn get<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Clone + Any + Send + Sync,
    {
        self.get_in(&self.config.default_namespace, key).await
    }

    /// Get a value.
    ///
    /// Lookup order: L1 → L2 (only when `Ready`). An L2 hit is promoted into
    /// L1 with its remaining TTL. A value stored under another type reads as
    /// a miss. Only an invalid key is an error.
    #[tracing::instrument(skip(self), fields(tier))]
    pub async fn get_in<T>(&self, namespace: &str, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned + Clone + Any + Send + Sync,
    {
        if self.state() == ManagerState::Disposed {
            return Ok(None);
        }
        let key = self.resolve_key(key, namespace)?;

        let cached = self.l1.lock().get::<T>(&key);
        if let Some(entry) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::Span::current().record("tier", "L1");
            crate::metrics::record_operation("L1", "get", "hit");
            return Ok(Some((*entry.value).clone()));
        }
        crate::metrics::record_operation("L1", "get", "miss");

        if self.l2_available() {
            if let Some(value) = self.get_from_l2::<T>(&key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::Span::current().record("tier", "L2");
                return Ok(Some(value));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::Span::current().record("tier", "miss");
        Ok(None)
    }

    /// Store a value in the default namespace.
    pub fn set<T>(&self, key: &str, value: T, ttl: Option<Duration>) -> Result<(), CacheError>
    where
        T: Serialize + Any + Send + Sync,
    {
        self.set_in(&self.config.default_namespace, key, value, ttl)
    }

    /// Store a value.
    ///
    /// L1 is written before this returns; the L2 write runs in the background
    /// (see [`flush()`](Self::flush)). `ttl = None` falls back to the
    /// configured default TTL. A value the codec cannot encode stays L1-only.
    #[tracing::instrument(skip(self, value))]
    pub fn set_in<T>(
        &self,
        namespace: &str,
        key: &str,
        value: T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>
    where
        T: Serialize + Any + Send + Sync,
    {
        if self.state() == ManagerState::Disposed {
            debug!("set after dispose ignored");
            return Ok(());
        }
        let key = self.resolve_key(key, namespace)?;
        let ttl = ttl.or_else(|| self.config.default_ttl());

        let payload = match self.codec.encode(&value) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(key = %key, error = %CacheError::from(e), "Encode failed, caching in L1 only");
                crate::metrics::record_error("L1", "set", "encode");
                None
            }
        };
        let size = payload.as_ref().map(|p| p.len() + key.len());

        {
            let mut l1 = self.l1.lock();
            l1.put(key.clone(), value, ttl, size);
            crate::metrics::set_l1_usage(l1.len(), l1.bytes());
        }
        crate::metrics::record_operation("L1", "set", "success");

        if let Some(payload) = payload {
            if self.l2_available() {
                self.spawn_persist(&key, payload, ttl);
            }
        }
        Ok(())
    }

    /// Remove a key from the default namespace.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.invalidate_in(&self.config.default_namespace, key).await
    }

    /// Remove a key from both tiers and cancel any queued L2 write for it.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate_in(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        if self.state() == ManagerState::Disposed {
            return Ok(());
        }
        let key = self.resolve_key(key, namespace)?;
        self.l1.lock().remove(&key);
        crate::metrics::record_operation("L1", "invalidate", "success");

        if self.l2_available() && self.l2.is_open(key.namespace()) {
            let slot = self.writes.supersede(key.as_str());
            {
                let _guard = slot.lock.lock().await;
                match self.l2.delete(key.namespace(), key.as_str()).await {
                    Ok(_) => crate::metrics::record_operation("L2", "invalidate", "success"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "L2 delete failed");
                        crate::metrics::record_operation("L2", "invalidate", "error");
                    }
                }
            }
            self.writes.release(key.as_str(), slot);
        }
        Ok(())
    }

    /// Normalize, then follow the migration ledger one hop.
    pub(super) fn resolve_key(&self, raw: &str, namespace: &str) -> Result<CacheKey, CacheError> {
        let key = self.normalizer.normalize(raw, namespace)?;
        let resolved = self.migrations.resolve(key.as_str());
        if resolved == key.as_str() {
            return Ok(key);
        }
        match CacheKey::parse(&resolved) {
            Ok(target) => Ok(target),
            Err(e) => {
                warn!(key = %key, target = %resolved, error = %e, "Ignoring malformed migration target");
                Ok(key)
            }
        }
    }

    async fn get_from_l2<T>(&self, key: &CacheKey) -> Option<T>
    where
        T: DeserializeOwned + Clone + Any + Send + Sync,
    {
        let namespace = key.namespace();
        if let Err(e) = self.l2.open(namespace).await {
            debug!(namespace, error = %e, "L2 namespace unavailable");
            return None;
        }

        let stored = {
            let _timer = crate::metrics::LatencyTimer::new("L2", "get");
            match self.l2.read_row(namespace, key.as_str()).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(key = %key, error = %e, "L2 read failed");
                    crate::metrics::record_operation("L2", "get", "error");
                    return None;
                }
            }
        };
        let Some(stored) = stored else {
            crate::metrics::record_operation("L2", "get", "miss");
            return None;
        };
        if stored.is_expired_at(now_millis()) {
            crate::metrics::record_operation("L2", "get", "miss");
            self.purge_expired(key).await;
            return None;
        }

        let value: T = match self.codec.decode(&stored.payload) {
            Ok(value) => value,
            Err(e) => {
                let mismatch = CacheError::TypeMismatch {
                    key: key.to_string(),
                    expected: std::any::type_name::<T>(),
                };
                debug!(error = %mismatch, cause = %e, "L2 value does not decode, treating as miss");
                crate::metrics::record_operation("L2", "get", "miss");
                return None;
            }
        };
        crate::metrics::record_operation("L2", "get", "hit");

        let ttl = stored.remaining_ttl_at(now_millis());
        let size = stored.payload.len() + key.len();
        let mut l1 = self.l1.lock();
        // A concurrent set wins over the promoted copy.
        if !l1.contains(key) {
            l1.put(key.clone(), value.clone(), ttl, Some(size));
            crate::metrics::set_l1_usage(l1.len(), l1.bytes());
        }
        Some(value)
    }

    // Holds the key's write slot: a persist that landed since the read is
    // seen by the re-check and kept.
    async fn purge_expired(&self, key: &CacheKey) {
        let slot = self.writes.slot(key.as_str());
        {
            let _guard = slot.lock.lock().await;
            match self.l2.purge_expired(key.namespace(), key.as_str()).await {
                Ok(true) => {
                    debug!(key = %key, "Expired L2 entry purged");
                    crate::metrics::record_expired("L2", 1);
                }
                Ok(false) => {}
                Err(e) => debug!(key = %key, error = %e, "Purge of expired L2 entry failed"),
            }
        }
        self.writes.release(key.as_str(), slot);
    }
}
