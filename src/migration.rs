// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key migration ledger.
//!
//! When a key scheme changes, the old key is mapped to its new form so cached
//! data written under the old scheme stays reachable. The ledger is an
//! append-only history of those mappings plus a `old_key -> new_key` index
//! used by [`CacheKeyMigrationAdapter::resolve`].
//!
//! # States
//!
//! ```text
//! Uninitialized ──initialize() ok──────────────────────► Persisted
//!       │                                                    ▲
//!       └──initialize() failed──► MemoryOnly ──initialize() ok┘
//! ```
//!
//! Until the ledger namespace opens, records live in memory only. On the
//! first successful open the persisted ledger is loaded and the in-memory
//! records are flushed once, de-duplicated by `old_key` (latest wins).
//!
//! Persisted rows are keyed by `old_key` and hold the JSON form of
//! [`MigrationRecord`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{now_millis, L2Store, StorageError, StoredValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// `initialize()` has not run yet
    Uninitialized,
    /// The ledger namespace could not be opened; records are in memory only
    MemoryOnly,
    /// Records are written through to the ledger namespace
    Persisted,
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::MemoryOnly => write!(f, "MemoryOnly"),
            Self::Persisted => write!(f, "Persisted"),
        }
    }
}

/// One key mapping. `migrated_at` is epoch millis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub old_key: String,
    pub new_key: String,
    pub migrated_at: i64,
}

struct Ledger {
    state: LedgerState,
    history: Vec<MigrationRecord>,
    current: HashMap<String, String>,
    /// Old keys whose current mapping is not yet in the ledger namespace
    unflushed: BTreeSet<String>,
}

pub struct CacheKeyMigrationAdapter {
    l2: Arc<L2Store>,
    namespace: String,
    ledger: Mutex<Ledger>,
    init_lock: tokio::sync::Mutex<()>,
    /// One flush at a time, so an older mapping never overwrites a newer one
    flush_lock: tokio::sync::Mutex<()>,
}

impl CacheKeyMigrationAdapter {
    pub fn new(l2: Arc<L2Store>, namespace: impl Into<String>) -> Self {
        Self {
            l2,
            namespace: namespace.into(),
            ledger: Mutex::new(Ledger {
                state: LedgerState::Uninitialized,
                history: Vec::new(),
                current: HashMap::new(),
                unflushed: BTreeSet::new(),
            }),
            init_lock: tokio::sync::Mutex::new(()),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn state(&self) -> LedgerState {
        self.ledger.lock().state
    }

    /// Open the ledger namespace, load what it holds and flush in-memory
    /// records. Never fails: an unavailable ledger leaves the adapter in
    /// `MemoryOnly`, and a later call may still succeed.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn initialize(&self) -> LedgerState {
        let _guard = self.init_lock.lock().await;
        if self.state() == LedgerState::Persisted {
            return LedgerState::Persisted;
        }

        if let Err(e) = self.l2.open(&self.namespace).await {
            warn!(error = %e, "Migration ledger unavailable, keeping records in memory");
            return self.set_state(LedgerState::MemoryOnly);
        }

        let persisted = match self.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Migration ledger load failed, keeping records in memory");
                return self.set_state(LedgerState::MemoryOnly);
            }
        };
        let loaded = persisted.len();
        self.merge_persisted(persisted);

        // Switch first: a record landing from here on flushes itself, and
        // everything recorded before is picked up below.
        self.set_state(LedgerState::Persisted);
        let flushed = self.flush_unflushed().await;
        info!(loaded, flushed, "Migration ledger persisted");
        LedgerState::Persisted
    }

    /// Record `old_key -> new_key`. Returns `false` when nothing changed:
    /// identical keys, or a mapping equal to the current one.
    pub async fn record_migration(&self, old_key: &str, new_key: &str) -> bool {
        if old_key == new_key {
            return false;
        }

        let state = {
            let mut ledger = self.ledger.lock();
            if ledger.current.get(old_key).map(String::as_str) == Some(new_key) {
                return false;
            }
            let record = MigrationRecord {
                old_key: old_key.to_string(),
                new_key: new_key.to_string(),
                migrated_at: now_millis(),
            };
            ledger.current.insert(record.old_key.clone(), record.new_key.clone());
            ledger.unflushed.insert(record.old_key.clone());
            ledger.history.push(record);
            ledger.state
        };
        debug!(old_key, new_key, state = %state, "Key migration recorded");

        if state == LedgerState::Persisted {
            self.flush_unflushed().await;
        }
        true
    }

    /// Most recent target for `key`, or `key` itself. Single hop.
    #[must_use]
    pub fn resolve(&self, key: &str) -> String {
        self.ledger
            .lock()
            .current
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    /// Full history, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<MigrationRecord> {
        self.ledger.lock().history.clone()
    }

    #[must_use]
    pub fn migration_count(&self) -> usize {
        self.ledger.lock().history.len()
    }

    /// Mappings still waiting to reach the ledger namespace.
    #[must_use]
    pub fn unflushed_count(&self) -> usize {
        self.ledger.lock().unflushed.len()
    }

    fn set_state(&self, state: LedgerState) -> LedgerState {
        self.ledger.lock().state = state;
        state
    }

    async fn load(&self) -> Result<Vec<MigrationRecord>, StorageError> {
        let mut records = Vec::new();
        for key in self.l2.scan_keys(&self.namespace).await? {
            let Some(stored) = self.l2.read(&self.namespace, &key).await? else {
                continue;
            };
            match serde_json::from_slice::<MigrationRecord>(&stored.payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable ledger row"),
            }
        }
        records.sort_by_key(|r| r.migrated_at);
        Ok(records)
    }

    // Mappings recorded in this process win over persisted ones.
    fn merge_persisted(&self, persisted: Vec<MigrationRecord>) {
        let mut guard = self.ledger.lock();
        let ledger = &mut *guard;
        let mut merged = Vec::with_capacity(persisted.len() + ledger.history.len());
        for record in persisted {
            match ledger.current.get(&record.old_key).cloned() {
                None => {
                    ledger.current.insert(record.old_key.clone(), record.new_key.clone());
                    merged.push(record);
                }
                Some(new_key) if new_key == record.new_key => {
                    ledger.unflushed.remove(&record.old_key);
                    // Keep the persisted timestamp, drop the in-memory duplicate.
                    ledger.history.retain(|r| !(r.old_key == record.old_key && r.new_key == record.new_key));
                    merged.push(record);
                }
                Some(_) => merged.push(record),
            }
        }
        merged.append(&mut ledger.history);
        merged.sort_by_key(|r| r.migrated_at);
        ledger.history = merged;
    }

    /// Write the current mapping of every unflushed old key. Failed writes
    /// stay unflushed. Returns how many were written.
    async fn flush_unflushed(&self) -> usize {
        let _flush = self.flush_lock.lock().await;
        let pending: Vec<MigrationRecord> = {
            let ledger = self.ledger.lock();
            ledger
                .unflushed
                .iter()
                .filter_map(|old_key| {
                    ledger
                        .history
                        .iter()
                        .rev()
                        .find(|r| &r.old_key == old_key)
                        .cloned()
                })
                .collect()
        };

        let mut written = 0;
        for record in pending {
            let payload = match serde_json::to_vec(&record) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(old_key = %record.old_key, error = %e, "Ledger record encode failed");
                    continue;
                }
            };
            let value = StoredValue::new(payload, None);
            match self.l2.write(&self.namespace, &record.old_key, &value).await {
                Ok(()) => {
                    written += 1;
                    let mut ledger = self.ledger.lock();
                    // A newer mapping recorded during the write stays unflushed.
                    if ledger.current.get(&record.old_key) == Some(&record.new_key) {
                        ledger.unflushed.remove(&record.old_key);
                    }
                }
                Err(e) => {
                    warn!(old_key = %record.old_key, error = %e, "Ledger write failed, will retry on next flush");
                }
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryEngine;
    use std::time::Duration;

    const LEDGER: &str = "__cache_key_migrations";

    fn adapter(engine: &Arc<MemoryEngine>) -> CacheKeyMigrationAdapter {
        let l2 = Arc::new(L2Store::new(engine.clone(), Duration::from_millis(200)));
        CacheKeyMigrationAdapter::new(l2, LEDGER)
    }

    #[tokio::test]
    async fn test_record_is_idempotent_in_memory() {
        let engine = Arc::new(MemoryEngine::unbootstrapped());
        let adapter = adapter(&engine);
        assert_eq!(adapter.initialize().await, LedgerState::MemoryOnly);

        assert!(adapter.record_migration("cache_quotes_aapl", "quotes:aapl").await);
        assert!(!adapter.record_migration("cache_quotes_aapl", "quotes:aapl").await);
        assert_eq!(adapter.migration_count(), 1);
        assert_eq!(adapter.resolve("cache_quotes_aapl"), "quotes:aapl");
        assert_eq!(adapter.resolve("quotes:msft"), "quotes:msft");
    }

    #[tokio::test]
    async fn test_identity_mapping_is_noop() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = adapter(&engine);
        assert!(!adapter.record_migration("quotes:aapl", "quotes:aapl").await);
        assert_eq!(adapter.migration_count(), 0);
    }

    #[tokio::test]
    async fn test_changed_target_appends() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = adapter(&engine);
        assert!(adapter.record_migration("a", "b").await);
        assert!(adapter.record_migration("a", "c").await);
        assert_eq!(adapter.migration_count(), 2);
        assert_eq!(adapter.resolve("a"), "c");
    }

    #[tokio::test]
    async fn test_resolve_is_single_hop() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = adapter(&engine);
        adapter.record_migration("a", "b").await;
        adapter.record_migration("b", "c").await;
        assert_eq!(adapter.resolve("a"), "b");
    }

    #[tokio::test]
    async fn test_memory_records_flush_once_on_initialize() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = adapter(&engine);
        assert_eq!(adapter.state(), LedgerState::Uninitialized);

        adapter.record_migration("a", "b").await;
        adapter.record_migration("x", "y").await;
        adapter.record_migration("a", "c").await;
        assert_eq!(adapter.unflushed_count(), 2);

        assert_eq!(adapter.initialize().await, LedgerState::Persisted);
        // De-duplicated by old key
        assert_eq!(engine.len(LEDGER), 2);
        assert_eq!(adapter.unflushed_count(), 0);
        assert_eq!(adapter.resolve("a"), "c");

        // Second initialize is a no-op
        assert_eq!(adapter.initialize().await, LedgerState::Persisted);
        assert_eq!(engine.len(LEDGER), 2);
    }

    #[tokio::test]
    async fn test_memory_only_recovers_on_later_initialize() {
        let engine = Arc::new(MemoryEngine::unbootstrapped());
        let adapter = adapter(&engine);
        assert_eq!(adapter.initialize().await, LedgerState::MemoryOnly);
        adapter.record_migration("a", "b").await;

        engine.bootstrap();
        assert_eq!(adapter.initialize().await, LedgerState::Persisted);
        assert_eq!(engine.len(LEDGER), 1);
        assert_eq!(adapter.resolve("a"), "b");
    }

    #[tokio::test]
    async fn test_persisted_ledger_survives_new_adapter() {
        let engine = Arc::new(MemoryEngine::new());
        let first = adapter(&engine);
        first.initialize().await;
        assert!(first.record_migration("a", "b").await);
        assert_eq!(engine.len(LEDGER), 1);

        let second = adapter(&engine);
        second.initialize().await;
        assert_eq!(second.resolve("a"), "b");
        assert_eq!(second.migration_count(), 1);
        assert!(!second.record_migration("a", "b").await);
        assert_eq!(second.migration_count(), 1);
    }

    #[tokio::test]
    async fn test_same_mapping_in_memory_and_ledger_not_duplicated() {
        let engine = Arc::new(MemoryEngine::new());
        let first = adapter(&engine);
        first.initialize().await;
        first.record_migration("a", "b").await;

        let second = adapter(&engine);
        second.record_migration("a", "b").await;
        second.initialize().await;
        assert_eq!(second.migration_count(), 1);
        assert_eq!(second.unflushed_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_stays_unflushed() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = adapter(&engine);
        adapter.initialize().await;

        engine.set_fail_io(true);
        assert!(adapter.record_migration("a", "b").await);
        assert_eq!(adapter.unflushed_count(), 1);
        assert_eq!(adapter.resolve("a"), "b");

        engine.set_fail_io(false);
        assert!(adapter.record_migration("x", "y").await);
        assert_eq!(adapter.unflushed_count(), 0);
        assert_eq!(engine.len(LEDGER), 2);
    }

    #[tokio::test]
    async fn test_record_during_initial_flush_is_persisted() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = Arc::new(adapter(&engine));
        assert!(adapter.record_migration("a", "a2").await);

        // Slow ledger writes keep the initial flush in flight
        engine.set_io_delay(Duration::from_millis(50));
        let init = tokio::spawn({
            let adapter = Arc::clone(&adapter);
            async move { adapter.initialize().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(adapter.record_migration("b", "b2").await);

        assert_eq!(init.await.unwrap(), LedgerState::Persisted);
        assert_eq!(adapter.unflushed_count(), 0);
        assert_eq!(engine.len(LEDGER), 2);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let engine = Arc::new(MemoryEngine::new());
        let l2 = Arc::new(L2Store::new(engine.clone(), Duration::from_millis(200)));
        l2.open(LEDGER).await.unwrap();
        l2.write(LEDGER, "junk", &StoredValue::new(b"not json".to_vec(), None))
            .await
            .unwrap();

        let adapter = CacheKeyMigrationAdapter::new(l2, LEDGER);
        assert_eq!(adapter.initialize().await, LedgerState::Persisted);
        assert_eq!(adapter.migration_count(), 0);
    }

    #[test]
    fn test_record_json_shape() {
        let record = MigrationRecord {
            old_key: "a".into(),
            new_key: "b".into(),
            migrated_at: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["old_key"], "a");
        assert_eq!(json["new_key"], "b");
        assert_eq!(json["migrated_at"], 1_700_000_000_000i64);
    }
}
