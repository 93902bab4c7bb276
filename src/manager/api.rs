//! Maintenance and diagnostics API.
//!
//! - `clear_expired()` - Sweep TTL-expired L1 entries
//! - `clear_all()` - Empty both tiers
//! - `stats()` - Point-in-time counters
//! - `contains()` / `len()` / `is_empty()` - L1 queries

use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::codec::ValueCodec;
use crate::error::CacheError;

use super::{CacheStats, ManagerState, UnifiedCacheManager};

impl<C: ValueCodec> UnifiedCacheManager<C> {
    /// Drop every TTL-expired L1 entry. Returns how many were removed.
    ///
    /// Expired entries already read as misses; this only reclaims memory.
    pub fn clear_expired(&self) -> usize {
        if self.state() == ManagerState::Disposed {
            return 0;
        }
        let mut l1 = self.l1.lock();
        let removed = l1.clear_expired();
        if removed > 0 {
            crate::metrics::record_expired("L1", removed);
            crate::metrics::set_l1_usage(l1.len(), l1.bytes());
        }
        removed
    }

    /// Empty both tiers. The migration ledger is kept.
    ///
    /// Queued L2 writes are cancelled first so none land after the clear.
    /// Safe whether or not L2 ever opened.
    #[tracing::instrument(skip(self))]
    pub async fn clear_all(&self) {
        self.l1.lock().clear();
        crate::metrics::set_l1_usage(0, 0);
        crate::metrics::record_operation("L1", "clear", "success");

        if !self.l2_available() {
            debug!("L2 unavailable, cleared L1 only");
            return;
        }

        self.writes.supersede_all();
        self.flush().await;
        match self.l2.clear_all_except(&[self.config.ledger_namespace.as_str()]).await {
            Ok(removed) => {
                info!(removed, "Cache cleared");
                crate::metrics::record_operation("L2", "clear", "success");
            }
            Err(e) => {
                warn!(error = %e, "L2 clear failed");
                crate::metrics::record_operation("L2", "clear", "error");
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let l1 = self.l1.lock().stats();
        let state = self.state();
        CacheStats {
            state,
            l1_count: l1.entries,
            l1_bytes: l1.bytes,
            l2_available: state.l2_available(),
            migration_count: self.migrations.migration_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: l1.evictions,
            pending_writes: self.pending_writes(),
        }
    }

    /// Whether a live entry for `key` is resident in L1. Does not touch
    /// recency or L2.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.contains_in(&self.config.default_namespace, key)
    }

    pub fn contains_in(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let key = self.resolve_key(key, namespace)?;
        Ok(self.l1.lock().contains(&key))
    }

    /// Resident L1 entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.l1.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.l1.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::MemoryEngine;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clear_all_before_initialize() {
        let engine = Arc::new(MemoryEngine::unbootstrapped());
        let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
        cache.set("a", 1u32, None).unwrap();
        cache.clear_all().await;
        assert!(cache.is_empty());
        assert_eq!(cache.stats().state, ManagerState::Constructed);
    }

    #[tokio::test]
    async fn test_clear_all_keeps_ledger() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = UnifiedCacheManager::new(CacheConfig::default(), engine.clone());
        cache.initialize().await;
        cache.set("a", 1u32, None).unwrap();
        cache.migrate_key("old", "new", "default").await.unwrap();
        cache.flush().await;
        assert_eq!(engine.len("default"), 1);

        cache.clear_all().await;
        assert_eq!(engine.len("default"), 0);
        assert_eq!(engine.len("__cache_key_migrations"), 1);
        assert!(cache.get::<u32>("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_expired_counts() {
        let engine = Arc::new(MemoryEngine::unbootstrapped());
        let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
        cache.set("short", 1u32, Some(Duration::from_secs(1))).unwrap();
        cache.set("long", 2u32, Some(Duration::from_secs(60))).unwrap();
        cache.set("forever", 3u32, None).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.clear_expired(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_stats_reflect_activity() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
        cache.initialize().await;
        cache.set("a", "alpha".to_string(), None).unwrap();
        assert_eq!(cache.get::<String>("a").await.unwrap().as_deref(), Some("alpha"));
        assert!(cache.get::<String>("missing").await.unwrap().is_none());
        cache.flush().await;

        let stats = cache.stats();
        assert_eq!(stats.state, ManagerState::Ready);
        assert!(stats.l2_available);
        assert_eq!(stats.l1_count, 1);
        assert!(stats.l1_bytes > 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.pending_writes, 0);
    }

    #[tokio::test]
    async fn test_contains_ignores_l2() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
        cache.initialize().await;
        cache.set("a", 1u8, None).unwrap();
        assert!(cache.contains("A").unwrap());
        assert!(!cache.contains("b").unwrap());
        assert!(cache.contains("").is_err());
    }
}
