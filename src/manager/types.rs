//! Public types for the cache manager.

/// Manager lifecycle state.
///
/// Use [`super::UnifiedCacheManager::state()`] to check the current state or
/// [`super::UnifiedCacheManager::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// L1 allocated, `initialize()` not called yet
    Constructed,
    /// Opening L2 namespaces and the migration ledger
    Initializing,
    /// Both tiers serving
    Ready,
    /// L2 failed to open; serving from L1 only
    Degraded,
    /// Shut down; reads miss and writes are ignored
    Disposed,
}

impl ManagerState {
    /// Whether the durable tier is serving.
    #[must_use]
    pub fn l2_available(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constructed => write!(f, "Constructed"),
            Self::Initializing => write!(f, "Initializing"),
            Self::Ready => write!(f, "Ready"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Disposed => write!(f, "Disposed"),
        }
    }
}

/// Application lifecycle signals forwarded by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// App moved to the background: sweep expired entries
    Background,
    /// App returned to the foreground
    Foreground,
}

/// Point-in-time snapshot from [`super::UnifiedCacheManager::stats()`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub state: ManagerState,
    /// Resident L1 entries
    pub l1_count: usize,
    /// Sum of L1 size estimates
    pub l1_bytes: usize,
    pub l2_available: bool,
    /// Entries in the key migration history
    pub migration_count: usize,
    /// `get` calls served by either tier
    pub hits: u64,
    /// `get` calls that missed both tiers
    pub misses: u64,
    /// L1 LRU evictions
    pub evictions: u64,
    /// L2 writes spawned but not yet settled
    pub pending_writes: usize,
}

impl CacheStats {
    /// Hit ratio over all `get` calls, 0.0 when there were none.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of [`super::UnifiedCacheManager::adopt_legacy_keys()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// L2 keys examined
    pub scanned: usize,
    /// Legacy rows moved to their canonical key
    pub migrated: usize,
    /// Legacy rows left unmoved: unparseable, or the canonical key already held data
    pub skipped: usize,
}
