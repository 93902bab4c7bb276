//! Scenario tests for the unified cache manager.
//!
//! All tests run against the in-process `MemoryEngine`, which can be left
//! unbootstrapped or made to fail/hang on open to drive the degraded paths
//! deterministically.
//!
//! # Running Tests
//! ```bash
//! cargo test --test manager
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: eviction, TTL, promotion, migration
//! - `degraded_*` - L2 unavailable: not bootstrapped, hanging, failing
//! - `lifecycle_*` - dispose, background signal

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use unified_cache::{
    CacheConfig, CacheError, InvalidKeyError, L2Store, LifecycleSignal, ManagerState, MemoryEngine,
    StoredValue, UnifiedCacheManager,
};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: f64,
}

fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price,
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        l2_open_timeout_ms: 200,
        ..Default::default()
    }
}

async fn ready_cache(engine: &Arc<MemoryEngine>) -> UnifiedCacheManager {
    let cache = UnifiedCacheManager::new(config(), engine.clone());
    assert_eq!(cache.initialize().await, ManagerState::Ready);
    cache
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn happy_lru_two_entries() {
    let engine = Arc::new(MemoryEngine::unbootstrapped());
    let cache = UnifiedCacheManager::new(
        CacheConfig {
            l1_max_entries: 2,
            ..config()
        },
        engine,
    );

    cache.set("a", 1u32, None).unwrap();
    cache.set("b", 2u32, None).unwrap();
    cache.set("c", 3u32, None).unwrap();

    assert_eq!(cache.get::<u32>("a").await.unwrap(), None);
    assert_eq!(cache.get::<u32>("b").await.unwrap(), Some(2));
    assert_eq!(cache.get::<u32>("c").await.unwrap(), Some(3));
    assert_eq!(cache.stats().evictions, 1);
}

#[tokio::test]
async fn happy_zero_ttl_is_a_miss() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    cache.set("a", 1u32, Some(Duration::ZERO)).unwrap();
    assert_eq!(cache.get::<u32>("a").await.unwrap(), None);
    cache.flush().await;
    // L2 copy is expired too
    assert_eq!(cache.get::<u32>("a").await.unwrap(), None);
}

#[tokio::test]
async fn happy_get_after_set_returns_value() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    cache.set("AAPL", quote("AAPL", 189.5), None).unwrap();
    assert_eq!(cache.get::<Quote>("aapl").await.unwrap(), Some(quote("AAPL", 189.5)));
}

#[tokio::test]
async fn happy_equivalent_keys_share_an_entry() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    cache
        .set_in("quotes", "cache_quotes_AAPL?period=1d&interval=5m", 1u32, None)
        .unwrap();
    let hit = cache
        .get_in::<u32>("quotes", "aapl|interval=5m,period=1d")
        .await
        .unwrap();
    assert_eq!(hit, Some(1));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn happy_type_replacement_never_corrupts() {
    let engine = Arc::new(MemoryEngine::unbootstrapped());
    let cache = UnifiedCacheManager::new(config(), engine);

    cache.set("k", 7u32, None).unwrap();
    cache.set("k", "seven".to_string(), None).unwrap();

    assert_eq!(cache.get::<u32>("k").await.unwrap(), None);
    assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("seven"));
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn happy_l2_hit_is_promoted_to_l1() {
    let engine = Arc::new(MemoryEngine::new());
    let writer = ready_cache(&engine).await;
    writer.set("msft", quote("MSFT", 410.0), None).unwrap();
    writer.flush().await;

    // Fresh manager: empty L1, same durable data
    let reader = ready_cache(&engine).await;
    assert!(reader.is_empty());
    assert_eq!(reader.get::<Quote>("msft").await.unwrap(), Some(quote("MSFT", 410.0)));
    assert!(reader.contains("msft").unwrap());
}

#[tokio::test]
async fn happy_promotion_keeps_remaining_ttl() {
    let engine = Arc::new(MemoryEngine::new());
    let writer = ready_cache(&engine).await;
    writer.set("short", 1u8, Some(Duration::from_millis(150))).unwrap();
    writer.flush().await;

    let reader = ready_cache(&engine).await;
    assert_eq!(reader.get::<u8>("short").await.unwrap(), Some(1));
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(reader.get::<u8>("short").await.unwrap(), None);
}

#[tokio::test]
async fn happy_invalidate_removes_from_both_tiers() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    cache.set("a", 1u32, None).unwrap();
    cache.flush().await;
    assert_eq!(engine.len("default"), 1);

    cache.invalidate("a").await.unwrap();
    assert_eq!(cache.get::<u32>("a").await.unwrap(), None);
    assert_eq!(engine.len("default"), 0);
}

#[tokio::test]
async fn happy_invalidate_supersedes_queued_write() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    cache.set("a", 1u32, None).unwrap();
    cache.invalidate("a").await.unwrap();
    cache.flush().await;
    assert_eq!(engine.len("default"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn happy_concurrent_sets_leave_last_value() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = Arc::new(ready_cache(&engine).await);

    for i in 0..200u32 {
        cache.set("hot", i, None).unwrap();
    }
    cache.flush().await;

    let fresh = ready_cache(&engine).await;
    assert_eq!(fresh.get::<u32>("hot").await.unwrap(), Some(199));
    assert_eq!(cache.stats().pending_writes, 0);
}

#[tokio::test]
async fn happy_migrate_key_idempotent() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;
    cache.set("v1_symbol_list", vec!["AAPL".to_string()], None).unwrap();
    cache.flush().await;

    assert!(cache.migrate_key("v1_symbol_list", "symbols", "default").await.unwrap());
    assert!(!cache.migrate_key("v1_symbol_list", "symbols", "default").await.unwrap());

    let stats = cache.stats();
    assert_eq!(stats.migration_count, 1);
    assert_eq!(
        cache.get::<Vec<String>>("symbols").await.unwrap(),
        Some(vec!["AAPL".to_string()])
    );
    assert_eq!(engine.len("__cache_key_migrations"), 1);
}

#[tokio::test]
async fn happy_legacy_adoption_on_initialize() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let l2 = L2Store::new(engine.clone(), Duration::from_secs(1));
        l2.open("default").await.unwrap();
        let value = StoredValue::new(b"42".to_vec(), None);
        l2.write("default", "cache_default_Answer", &value).await.unwrap();
    }

    let cache = ready_cache(&engine).await;
    assert_eq!(cache.get::<u32>("answer").await.unwrap(), Some(42));
    assert_eq!(cache.stats().migration_count, 1);

    // A second manager finds nothing left to adopt
    let again = ready_cache(&engine).await;
    assert_eq!(again.adopt_legacy_keys("default").await.migrated, 0);
    assert_eq!(again.stats().migration_count, 1);
}

#[tokio::test]
async fn happy_own_rows_are_not_adopted_on_restart() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let cache = ready_cache(&engine).await;
        cache.set("default  report", "spaced".to_string(), None).unwrap();
        cache.set("fund nav", "plain".to_string(), None).unwrap();
        cache.dispose().await;
    }
    assert!(engine.row("default", "default:report").is_some());
    assert!(engine.row("default", "default:fund_nav").is_some());

    let cache = ready_cache(&engine).await;
    assert_eq!(cache.stats().migration_count, 0);
    assert_eq!(cache.adopt_legacy_keys("default").await.migrated, 0);
    assert_eq!(
        cache.get::<String>("default report").await.unwrap().as_deref(),
        Some("spaced")
    );
    assert_eq!(cache.get::<String>("fund nav").await.unwrap().as_deref(), Some("plain"));
    assert_eq!(cache.get::<String>("nav").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_expired_row_purge_spares_newer_write() {
    let engine = Arc::new(MemoryEngine::new());
    {
        let l2 = L2Store::new(engine.clone(), Duration::from_secs(1));
        l2.open("default").await.unwrap();
        let expired = StoredValue {
            payload: b"1".to_vec(),
            stored_at: 0,
            expires_at: Some(1),
        };
        l2.write("default", "default:k", &expired).await.unwrap();
    }
    let cache = Arc::new(ready_cache(&engine).await);

    // The reader sees the expired row, then stalls before acting on it
    engine.set_io_delay(Duration::from_millis(100));
    let reader = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.get::<u32>("k").await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.set("k", 2u32, None).unwrap();
    cache.flush().await;
    reader.await.unwrap().unwrap();

    engine.set_io_delay(Duration::ZERO);
    let row = engine.row("default", "default:k").expect("newer write survives");
    assert_eq!(row.payload, b"2");
    assert_eq!(row.expires_at, None);
}

#[tokio::test]
async fn happy_invalid_key_is_the_only_error() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;

    let err = cache.set("   ", 1u8, None).unwrap_err();
    assert!(matches!(err, CacheError::InvalidKey(InvalidKeyError::Empty)));
    assert!(cache.get::<u8>("").await.is_err());
    assert!(cache.get_in::<u8>("bad:ns", "k").await.is_err());
    assert!(cache.invalidate("\u{0007}").await.is_err());
}

// =============================================================================
// Degraded
// =============================================================================

#[tokio::test]
async fn degraded_engine_not_ready() {
    let engine = Arc::new(MemoryEngine::unbootstrapped());
    let cache = UnifiedCacheManager::new(config(), engine);

    assert_eq!(cache.initialize().await, ManagerState::Degraded);
    assert!(!cache.stats().l2_available);

    cache.set("k", "v".to_string(), None).unwrap();
    assert_eq!(cache.get::<String>("k").await.unwrap().as_deref(), Some("v"));
    cache.clear_all().await;
    assert_eq!(cache.get::<String>("k").await.unwrap(), None);
}

#[tokio::test]
async fn degraded_hanging_open_times_out() {
    let engine = Arc::new(MemoryEngine::new());
    engine.set_hang_opens(true);
    let cache = UnifiedCacheManager::new(config(), engine);

    let state = tokio::time::timeout(Duration::from_secs(5), cache.initialize())
        .await
        .expect("initialize must not hang");
    assert_eq!(state, ManagerState::Degraded);

    cache.set("k", 1u32, None).unwrap();
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));
}

#[tokio::test]
async fn degraded_failing_open() {
    let engine = Arc::new(MemoryEngine::new());
    engine.set_fail_opens(true);
    let cache = UnifiedCacheManager::new(config(), engine);

    assert_eq!(cache.initialize().await, ManagerState::Degraded);
    cache.migrate_key("a", "b", "default").await.unwrap();
    assert_eq!(cache.stats().migration_count, 1);
}

#[tokio::test]
async fn degraded_write_failures_stay_silent() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;
    engine.set_fail_io(true);

    cache.set("k", 1u32, None).unwrap();
    cache.flush().await;
    assert_eq!(cache.get::<u32>("k").await.unwrap(), Some(1));
    assert_eq!(cache.get::<u32>("other").await.unwrap(), None);
}

#[tokio::test]
async fn degraded_operations_before_initialize() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = UnifiedCacheManager::new(config(), engine.clone());

    cache.set("early", 1u32, None).unwrap();
    assert_eq!(cache.get::<u32>("early").await.unwrap(), Some(1));
    cache.clear_all().await;
    assert!(cache.is_empty());
    // Nothing reached L2 before it opened
    assert!(engine.is_empty("default"));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn lifecycle_dispose_flushes_then_ignores() {
    let engine = Arc::new(MemoryEngine::new());
    let cache = ready_cache(&engine).await;
    cache.set("kept", 1u32, None).unwrap();

    cache.dispose().await;
    assert_eq!(engine.len("default"), 1);
    assert_eq!(cache.state(), ManagerState::Disposed);

    assert_eq!(cache.get::<u32>("kept").await.unwrap(), None);
    cache.set("late", 2u32, None).unwrap();
    cache.invalidate("kept").await.unwrap();
    assert!(cache.is_empty());
    assert_eq!(cache.clear_expired(), 0);
    assert_eq!(engine.len("default"), 1);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_background_sweeps_expired() {
    let engine = Arc::new(MemoryEngine::unbootstrapped());
    let cache = UnifiedCacheManager::new(config(), engine);
    cache.set("a", 1u32, Some(Duration::from_secs(1))).unwrap();
    cache.set("b", 2u32, None).unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.on_lifecycle(LifecycleSignal::Foreground);
    assert_eq!(cache.len(), 2);
    cache.on_lifecycle(LifecycleSignal::Background);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn lifecycle_default_ttl_applies() {
    let engine = Arc::new(MemoryEngine::unbootstrapped());
    let cache = UnifiedCacheManager::new(
        CacheConfig {
            default_ttl_secs: Some(0),
            ..config()
        },
        engine,
    );
    cache.set("a", 1u32, None).unwrap();
    assert_eq!(cache.get::<u32>("a").await.unwrap(), None);
    cache.set("b", 2u32, Some(Duration::from_secs(60))).unwrap();
    assert_eq!(cache.get::<u32>("b").await.unwrap(), Some(2));
}
