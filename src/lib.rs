// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Unified Cache
//!
//! An embedded two-tier cache for client applications: a bounded in-memory
//! LRU in front of a durable on-disk store, with key normalization and
//! migration across historical cache-key schemes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      UnifiedCacheManager                    │
//! │  • get / set / invalidate / clear_all / stats               │
//! │  • Constructed → Initializing → Ready | Degraded → Disposed │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!            (KeyNormalizer → CacheKeyMigrationAdapter)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    L1: In-Memory LRU                        │
//! │  • Typed values, type-erased storage                        │
//! │  • O(1) eviction under entry-count and byte bounds          │
//! │  • Lazy TTL expiry                                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                (Background write per key, ordered)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   L2: Durable Store                         │
//! │  • Namespaced key → bytes (SQLite via sqlx, or memory)      │
//! │  • Survives restarts; values encoded by a ValueCodec        │
//! │  • Open bounded by a timeout; failure degrades to L1-only   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use unified_cache::{CacheConfig, SqlEngine, UnifiedCacheManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), unified_cache::CacheError> {
//!     SqlEngine::bootstrap();
//!     let engine = Arc::new(SqlEngine::sqlite("cache.db"));
//!     let cache = UnifiedCacheManager::new(CacheConfig::default(), engine);
//!
//!     // Safe before initialize(): L1 is always there
//!     cache.set("quotes_AAPL", 189.5f64, Some(Duration::from_secs(60)))?;
//!
//!     cache.initialize().await;
//!     let price: Option<f64> = cache.get("quotes_aapl").await?;
//!     println!("{price:?} ({:?})", cache.stats());
//!
//!     cache.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`manager`]: [`UnifiedCacheManager`], the entry point
//! - [`key`]: key normalization
//! - [`l1`]: the in-memory tier
//! - [`storage`]: the durable tier and its engines
//! - [`migration`]: the key migration ledger
//! - [`codec`]: L2 value encodings
//! - [`resilience`]: retry with backoff

pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod l1;
pub mod manager;
pub mod metrics;
pub mod migration;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use codec::{CodecError, JsonCodec, ValueCodec};
#[cfg(feature = "compression")]
pub use codec::ZstdJsonCodec;
pub use config::{CacheConfig, ConfigError};
pub use error::CacheError;
pub use key::{CacheKey, InvalidKeyError, KeyNormalizer};
pub use l1::{CacheEntry, L1MemoryCache, L1Stats};
pub use manager::{CacheStats, LifecycleSignal, ManagerState, MigrationReport, UnifiedCacheManager};
pub use metrics::LatencyTimer;
pub use migration::{CacheKeyMigrationAdapter, LedgerState, MigrationRecord};
pub use resilience::retry::RetryConfig;
pub use storage::{
    L2Store, MemoryEngine, NamespaceBox, OpenError, SqlEngine, StorageEngine, StorageError, StoredValue,
};
