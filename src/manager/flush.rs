// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background L2 persistence.
//!
//! `set` writes L1 synchronously and hands the encoded payload to a spawned
//! task. Tasks for the same key are serialized by a per-key slot holding a
//! `tokio::sync::Mutex` and a sequence number: every `set` and `invalidate`
//! bumps the sequence, and a task whose sequence is no longer current skips
//! its write. A stale payload therefore never lands after a newer one.
//!
//! Slots are dropped from the map as soon as nothing references them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::codec::ValueCodec;
use crate::key::CacheKey;
use crate::storage::StoredValue;

use super::UnifiedCacheManager;

pub(super) struct KeySlot {
    seq: AtomicU64,
    pub(super) lock: Mutex<()>,
}

impl KeySlot {
    fn bump(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_current(&self, seq: u64) -> bool {
        self.seq.load(Ordering::Acquire) == seq
    }
}

/// Pending-write accounting and per-key ordering.
#[derive(Default)]
pub(super) struct WriteTracker {
    slots: DashMap<String, Arc<KeySlot>>,
    pending: AtomicUsize,
    idle: Notify,
}

impl WriteTracker {
    pub(super) fn slot(&self, key: &str) -> Arc<KeySlot> {
        self.slots
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(KeySlot {
                    seq: AtomicU64::new(0),
                    lock: Mutex::new(()),
                })
            })
            .clone()
    }

    /// Invalidate any queued write for `key`. Returns the slot for callers
    /// that go on to touch L2 under its lock.
    pub(super) fn supersede(&self, key: &str) -> Arc<KeySlot> {
        let slot = self.slot(key);
        slot.bump();
        slot
    }

    /// Invalidate every queued write.
    pub(super) fn supersede_all(&self) {
        for slot in self.slots.iter() {
            slot.value().bump();
        }
    }

    /// Drop the slot for `key` if no task or caller still holds it.
    pub(super) fn release(&self, key: &str, slot: Arc<KeySlot>) {
        drop(slot);
        self.slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }

    pub(super) fn begin(self: &Arc<Self>) -> PendingWrite {
        let count = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        crate::metrics::set_pending_writes(count);
        PendingWrite {
            tracker: Arc::clone(self),
        }
    }

    pub(super) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Resolve once no write is pending.
    pub(super) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts one in-flight write; settles it on drop, even if the task panics.
pub(super) struct PendingWrite {
    tracker: Arc<WriteTracker>,
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        let left = self.tracker.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        crate::metrics::set_pending_writes(left);
        if left == 0 {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl<C: ValueCodec> UnifiedCacheManager<C> {
    /// Queue an L2 write of `payload` under `key`. Fire-and-forget: failures
    /// are logged and counted, never returned.
    pub(super) fn spawn_persist(&self, key: &CacheKey, payload: Vec<u8>, ttl: Option<Duration>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %key, "No Tokio runtime, value kept in L1 only");
            crate::metrics::record_operation("L2", "set", "skipped");
            return;
        };

        let slot = self.writes.slot(key.as_str());
        let seq = slot.bump();
        let pending = self.writes.begin();
        let l2 = Arc::clone(&self.l2);
        let writes = Arc::clone(&self.writes);
        let namespace = key.namespace().to_string();
        let storage_key = key.as_str().to_string();
        let value = StoredValue::new(payload, ttl);

        runtime.spawn(async move {
            let _pending = pending;
            {
                let _guard = slot.lock.lock().await;
                if !slot.is_current(seq) {
                    debug!(key = %storage_key, seq, "Superseded L2 write skipped");
                    crate::metrics::record_operation("L2", "set", "skipped");
                } else if let Err(e) = l2.open(&namespace).await {
                    debug!(key = %storage_key, error = %e, "L2 namespace unavailable, write dropped");
                    crate::metrics::record_error("L2", "set", "open");
                } else {
                    let _timer = crate::metrics::LatencyTimer::new("L2", "set");
                    match l2.write(&namespace, &storage_key, &value).await {
                        Ok(()) => crate::metrics::record_operation("L2", "set", "success"),
                        Err(e) => {
                            warn!(key = %storage_key, error = %e, "L2 write failed");
                            crate::metrics::record_operation("L2", "set", "error");
                        }
                    }
                }
            }
            writes.release(&storage_key, slot);
        });
    }

    /// Wait until every spawned L2 write has settled.
    pub async fn flush(&self) {
        self.writes.wait_idle().await;
    }

    /// L2 writes spawned but not yet settled.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.writes.pending()
    }
}
