// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! L1: bounded in-process memory tier.
//!
//! [`L1MemoryCache`] stores values of any `'static + Send + Sync` type under a
//! [`CacheKey`], evicting least-recently-used entries whenever either bound is
//! exceeded:
//!
//! - `max_entries`: resident entry count
//! - `max_bytes`: sum of per-entry size estimates
//!
//! Lookup is a `HashMap<CacheKey, SlotIdx>` into a slab-backed recency list,
//! so `get`, `put` and eviction are all O(1).
//!
//! Values are type-erased with a `TypeId` tag. A `put` with a different type
//! than the resident value never mutates the old node: it is dropped and a
//! fresh node is allocated. A `get::<T>` against a value of another type is a
//! miss.
//!
//! The cache is not internally synchronized; owners wrap it in a single mutex.
//!
//! # Example
//!
//! ```
//! use unified_cache::{KeyNormalizer, L1MemoryCache};
//!
//! let keys = KeyNormalizer::default();
//! let mut l1 = L1MemoryCache::new(2, 1024);
//!
//! let a = keys.normalize("a", "demo").unwrap();
//! let b = keys.normalize("b", "demo").unwrap();
//! let c = keys.normalize("c", "demo").unwrap();
//!
//! l1.put(a.clone(), 1u32, None, None);
//! l1.put(b.clone(), 2u32, None, None);
//! l1.put(c.clone(), 3u32, None, None);
//!
//! assert!(l1.get::<u32>(&a).is_none()); // evicted
//! assert_eq!(*l1.get::<u32>(&c).unwrap().value, 3);
//! ```

mod entry;
mod list;

pub use entry::CacheEntry;

use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::key::CacheKey;
use entry::ErasedEntry;
use list::{LruList, SlotIdx};

/// Counters and gauges for the memory tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L1Stats {
    pub entries: usize,
    pub bytes: usize,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Puts that replaced a node holding a different type
    pub type_replacements: u64,
}

pub struct L1MemoryCache {
    map: HashMap<CacheKey, SlotIdx>,
    list: LruList<ErasedEntry>,
    bytes: usize,
    max_entries: usize,
    max_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    type_replacements: u64,
}

impl L1MemoryCache {
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            map: HashMap::new(),
            list: LruList::new(),
            bytes: 0,
            max_entries,
            max_bytes,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
            type_replacements: 0,
        }
    }

    /// Look up a typed entry and mark it most recently used.
    ///
    /// Expired entries are evicted and reported as a miss. An entry of a
    /// different type is a miss and keeps its position.
    pub fn get<T: Any + Send + Sync>(&mut self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let Some(&idx) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };
        let now = Instant::now();

        let (expired, type_matches, found) = match self.list.get(idx) {
            Some(node) => (node.is_expired(now), node.holds::<T>(), node.type_name),
            None => {
                self.corrupted("get: index has no node");
                return None;
            }
        };

        if expired {
            trace!(key = %key, "L1 entry expired");
            self.remove_slot(key, idx);
            self.expirations += 1;
            self.misses += 1;
            return None;
        }
        if !type_matches {
            debug!(
                key = %key,
                expected = std::any::type_name::<T>(),
                found,
                "L1 type mismatch, treating as miss"
            );
            self.misses += 1;
            return None;
        }
        if !self.list.move_to_front(idx) {
            self.corrupted("get: relink failed");
            return None;
        }

        let typed = self.list.get_mut(idx).and_then(|node| {
            node.last_access = now;
            node.access_count = node.access_count.saturating_add(1);
            node.typed::<T>()
        });
        match typed {
            Some(entry) => {
                self.hits += 1;
                Some(entry)
            }
            None => {
                self.corrupted("get: downcast failed after tag check");
                None
            }
        }
    }

    /// Whether a live (unexpired) entry exists, without touching recency.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.map
            .get(key)
            .and_then(|&idx| self.list.get(idx))
            .is_some_and(|node| !node.is_expired(now))
    }

    /// Insert or update, then evict from the LRU end until both bounds hold.
    ///
    /// `size_hint` is the caller's size estimate in bytes; without one the
    /// estimate is `size_of::<T>()` plus the key length.
    pub fn put<T: Any + Send + Sync>(
        &mut self,
        key: CacheKey,
        value: T,
        ttl: Option<Duration>,
        size_hint: Option<usize>,
    ) {
        let size = size_hint.unwrap_or_else(|| std::mem::size_of::<T>() + key.len());
        let now = Instant::now();

        if let Some(&idx) = self.map.get(&key) {
            match self.list.get(idx).map(ErasedEntry::holds::<T>) {
                Some(true) => {
                    let old_size = self.list.get(idx).map_or(0, |n| n.size_bytes);
                    if let Some(node) = self.list.get_mut(idx) {
                        node.replace(value, ttl, size, now);
                    }
                    if !self.list.move_to_front(idx) {
                        self.corrupted("put: relink failed");
                        return;
                    }
                    self.bytes = self.bytes.saturating_sub(old_size) + size;
                    self.enforce_bounds();
                    return;
                }
                Some(false) => {
                    debug!(
                        key = %key,
                        new_type = std::any::type_name::<T>(),
                        "L1 type changed, replacing node"
                    );
                    self.type_replacements += 1;
                    self.remove_slot(&key, idx);
                }
                None => {
                    self.corrupted("put: index has no node");
                }
            }
        }

        let node = ErasedEntry::new(key.clone(), value, ttl, size, now);
        match self.list.push_front(node) {
            Some(idx) => {
                self.map.insert(key, idx);
                self.bytes += size;
            }
            None => error!(key = %key, "L1 slab exhausted, entry not cached"),
        }
        self.enforce_bounds();
    }

    /// Remove the least-recently-used entry, returning its key.
    pub fn evict_one_lru(&mut self) -> Option<CacheKey> {
        let node = self.list.pop_back()?;
        if self.map.remove(&node.key).is_none() {
            error!(key = %node.key, "L1 evicted a node missing from the index");
        }
        self.bytes = self.bytes.saturating_sub(node.size_bytes);
        self.evictions += 1;
        crate::metrics::record_eviction("L1", node.size_bytes);
        Some(node.key)
    }

    pub fn remove(&mut self, key: &CacheKey) -> bool {
        match self.map.get(key) {
            Some(&idx) => self.remove_slot(key, idx),
            None => false,
        }
    }

    /// Move a live entry to a new key, keeping its value, TTL and size.
    /// Does nothing if `from` is absent or expired, or `to` already exists.
    pub fn rename(&mut self, from: &CacheKey, to: CacheKey) -> bool {
        if from == &to || self.contains(&to) {
            return false;
        }
        if !self.contains(from) {
            return false;
        }
        let Some(&idx) = self.map.get(from) else {
            return false;
        };
        let Some(mut node) = self.list.remove(idx) else {
            self.corrupted("rename: index has no node");
            return false;
        };
        self.map.remove(from);
        // An expired node at `to` may still be resident.
        if let Some(&stale) = self.map.get(&to) {
            self.remove_slot(&to, stale);
        }
        node.key = to.clone();
        match self.list.push_front(node) {
            Some(new_idx) => {
                self.map.insert(to, new_idx);
                true
            }
            None => {
                self.corrupted("rename: slab exhausted");
                false
            }
        }
    }

    /// Drop every TTL-expired entry. Returns how many were removed.
    pub fn clear_expired(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<(CacheKey, SlotIdx)> = self
            .list
            .iter()
            .filter(|(_, node)| node.is_expired(now))
            .map(|(idx, node)| (node.key.clone(), idx))
            .collect();

        let mut removed = 0;
        for (key, idx) in expired {
            if self.remove_slot(&key, idx) {
                removed += 1;
            }
        }
        self.expirations += removed as u64;
        removed
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.list.clear();
        self.bytes = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    #[must_use]
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Resident keys, most recently used first.
    #[must_use]
    pub fn keys_mru(&self) -> Vec<CacheKey> {
        self.list.iter().map(|(_, node)| node.key.clone()).collect()
    }

    #[must_use]
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            entries: self.len(),
            bytes: self.bytes,
            max_entries: self.max_entries,
            max_bytes: self.max_bytes,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expirations: self.expirations,
            type_replacements: self.type_replacements,
        }
    }

    /// Full structural check: every indexed node is on the list exactly once,
    /// the list holds nothing else, and the byte counter matches.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        if self.list.len() != self.map.len() {
            return false;
        }
        let mut seen = 0usize;
        let mut bytes = 0usize;
        for (idx, node) in self.list.iter() {
            if self.map.get(&node.key) != Some(&idx) {
                return false;
            }
            seen += 1;
            bytes += node.size_bytes;
        }
        seen == self.map.len() && bytes == self.bytes
    }

    fn enforce_bounds(&mut self) {
        while self.map.len() > self.max_entries || self.bytes > self.max_bytes {
            if self.evict_one_lru().is_none() {
                if !self.map.is_empty() || self.bytes != 0 {
                    self.corrupted("enforce_bounds: list empty but index is not");
                }
                break;
            }
        }
    }

    fn remove_slot(&mut self, key: &CacheKey, idx: SlotIdx) -> bool {
        match self.list.remove(idx) {
            Some(node) => {
                self.map.remove(key);
                self.bytes = self.bytes.saturating_sub(node.size_bytes);
                true
            }
            None => {
                self.corrupted("remove: index has no node");
                false
            }
        }
    }

    // Index and list disagree. Dropping everything is always safe for a cache.
    fn corrupted(&mut self, context: &'static str) {
        error!(
            context,
            entries = self.map.len(),
            listed = self.list.len(),
            "L1 invariant violated, resetting memory tier"
        );
        self.clear();
        self.misses += 1;
    }
}
