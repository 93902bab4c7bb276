use std::any::{Any, TypeId};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::key::CacheKey;

/// A typed view of an L1 entry, returned by [`super::L1MemoryCache::get`].
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    pub inserted_at: Instant,
    pub last_access: Instant,
    /// TTL the entry was written with (`None` = no expiry)
    pub ttl: Option<Duration>,
    /// Approximate size used for the byte budget
    pub size_bytes: usize,
    pub access_count: u64,
}

impl<T> CacheEntry<T> {
    /// Time left before expiry, `None` if the entry never expires.
    #[must_use]
    pub fn remaining_ttl(&self) -> Option<Duration> {
        let ttl = self.ttl?;
        let deadline = self.inserted_at.checked_add(ttl)?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }
}

/// Type-erased node payload. The `type_id` tag is checked on every typed access.
pub(crate) struct ErasedEntry {
    pub(crate) key: CacheKey,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) size_bytes: usize,
    pub(crate) inserted_at: Instant,
    pub(crate) last_access: Instant,
    pub(crate) ttl: Option<Duration>,
    pub(crate) expires_at: Option<Instant>,
    pub(crate) access_count: u64,
}

impl ErasedEntry {
    pub(crate) fn new<T: Any + Send + Sync>(
        key: CacheKey,
        value: T,
        ttl: Option<Duration>,
        size_bytes: usize,
        now: Instant,
    ) -> Self {
        Self {
            key,
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            size_bytes,
            inserted_at: now,
            last_access: now,
            ttl,
            expires_at: ttl.and_then(|t| now.checked_add(t)),
            access_count: 0,
        }
    }

    /// Overwrite in place. Callers must have checked the type tag already.
    pub(crate) fn replace<T: Any + Send + Sync>(
        &mut self,
        value: T,
        ttl: Option<Duration>,
        size_bytes: usize,
        now: Instant,
    ) {
        self.value = Arc::new(value);
        self.size_bytes = size_bytes;
        self.inserted_at = now;
        self.last_access = now;
        self.ttl = ttl;
        self.expires_at = ttl.and_then(|t| now.checked_add(t));
    }

    #[inline]
    pub(crate) fn holds<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Zero TTL expires at insertion time.
    #[inline]
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    pub(crate) fn typed<T: Any + Send + Sync>(&self) -> Option<CacheEntry<T>> {
        let value = Arc::clone(&self.value).downcast::<T>().ok()?;
        Some(CacheEntry {
            value,
            inserted_at: self.inserted_at,
            last_access: self.last_access,
            ttl: self.ttl,
            size_bytes: self.size_bytes,
            access_count: self.access_count,
        })
    }
}
