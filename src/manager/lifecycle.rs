//! Manager lifecycle: initialize, dispose, host lifecycle signals.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::ValueCodec;
use crate::migration::LedgerState;
use crate::storage::OpenError;

use super::{LifecycleSignal, ManagerState, UnifiedCacheManager};

impl<C: ValueCodec> UnifiedCacheManager<C> {
    /// Bring up L2 and the migration ledger.
    ///
    /// Startup flow:
    /// 1. Open the configured L2 namespaces and the ledger concurrently, each
    ///    open bounded by `l2_open_timeout_ms`
    /// 2. All namespaces open → `Ready`; any failure → `Degraded` (L1 only)
    /// 3. When `Ready` and `migrate_legacy_on_init` is set, adopt legacy keys
    ///
    /// Never fails and never hangs past the open timeout. Idempotent: once
    /// the manager has left `Constructed`, later calls return the current
    /// state. Concurrent callers wait for the first one.
    #[tracing::instrument(skip(self), fields(engine = self.l2.engine_name(), outcome))]
    pub async fn initialize(&self) -> ManagerState {
        let _guard = self.init_lock.lock().await;
        let current = self.state();
        if current != ManagerState::Constructed {
            debug!(state = %current, "initialize() already ran");
            return current;
        }

        let started = Instant::now();
        let _ = self.state.send(ManagerState::Initializing);
        info!(namespaces = ?self.config.l2_namespaces, "Initializing cache manager");

        let (opened, ledger) = tokio::join!(self.open_namespaces(), self.migrations.initialize());
        crate::metrics::record_startup_phase("l2_open", started.elapsed());

        if ledger != LedgerState::Persisted {
            warn!(ledger = %ledger, "Migration ledger not persisted");
        }

        let next = match opened {
            Ok(()) => ManagerState::Ready,
            Err(e) => {
                warn!(error = %e, "L2 unavailable, running L1-only");
                crate::metrics::record_error("L2", "open", open_error_kind(&e));
                ManagerState::Degraded
            }
        };
        let _ = self.state.send(next);
        crate::metrics::set_l2_available(next.l2_available());

        if next == ManagerState::Ready && self.config.migrate_legacy_on_init {
            let phase = Instant::now();
            for namespace in &self.config.l2_namespaces {
                let report = self.adopt_legacy_keys(namespace).await;
                if report.migrated > 0 || report.skipped > 0 {
                    info!(
                        namespace = %namespace,
                        scanned = report.scanned,
                        migrated = report.migrated,
                        skipped = report.skipped,
                        "Legacy cache keys adopted"
                    );
                }
            }
            crate::metrics::record_startup_phase("legacy_adoption", phase.elapsed());
        }

        let outcome = if next == ManagerState::Ready { "ready" } else { "degraded" };
        tracing::Span::current().record("outcome", outcome);
        crate::metrics::record_startup(outcome, started.elapsed());
        info!(state = %next, elapsed_ms = started.elapsed().as_millis() as u64, "Cache manager initialized");
        next
    }

    /// Shut down: settle pending L2 writes, close L2 and empty L1.
    ///
    /// Afterwards `get` returns `None` and `set`/`invalidate` do nothing.
    #[tracing::instrument(skip(self))]
    pub async fn dispose(&self) {
        let _guard = self.init_lock.lock().await;
        if self.state() == ManagerState::Disposed {
            return;
        }
        let _ = self.state.send(ManagerState::Disposed);

        let pending = self.pending_writes();
        if pending > 0 {
            debug!(pending, "Flushing pending L2 writes before close");
        }
        self.flush().await;
        self.l2.close().await;

        let mut l1 = self.l1.lock();
        l1.clear();
        crate::metrics::set_l1_usage(0, 0);
        crate::metrics::set_l2_available(false);
        info!("Cache manager disposed");
    }

    /// React to the host app moving between foreground and background.
    pub fn on_lifecycle(&self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Background => {
                let removed = self.clear_expired();
                debug!(removed, "Background sweep of expired entries");
            }
            LifecycleSignal::Foreground => {}
        }
    }

    async fn open_namespaces(&self) -> Result<(), OpenError> {
        if !self.l2.engine_ready() {
            return Err(OpenError::EngineNotReady);
        }
        for namespace in &self.config.l2_namespaces {
            self.l2.open(namespace).await?;
        }
        Ok(())
    }
}

fn open_error_kind(e: &OpenError) -> &'static str {
    match e {
        OpenError::EngineNotReady => "engine_not_ready",
        OpenError::Timeout { .. } => "timeout",
        OpenError::Backend { .. } => "backend",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::storage::MemoryEngine;
    use std::sync::Arc;

    fn manager(engine: &Arc<MemoryEngine>) -> UnifiedCacheManager {
        UnifiedCacheManager::new(CacheConfig::default(), engine.clone())
    }

    #[tokio::test]
    async fn test_initialize_ready_with_engine() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = manager(&engine);
        assert_eq!(cache.state(), ManagerState::Constructed);
        assert_eq!(cache.initialize().await, ManagerState::Ready);
        assert!(cache.l2_available());
        assert_eq!(cache.migrations().state(), LedgerState::Persisted);
    }

    #[tokio::test]
    async fn test_initialize_degrades_without_bootstrap() {
        let engine = Arc::new(MemoryEngine::unbootstrapped());
        let cache = manager(&engine);
        assert_eq!(cache.initialize().await, ManagerState::Degraded);
        assert_eq!(cache.migrations().state(), LedgerState::MemoryOnly);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = Arc::new(manager(&engine));
        let (a, b) = tokio::join!(cache.initialize(), cache.initialize());
        assert_eq!(a, ManagerState::Ready);
        assert_eq!(b, ManagerState::Ready);
        // default namespace + ledger, each opened once
        assert_eq!(engine.open_count(), 2);
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = manager(&engine);
        cache.initialize().await;
        cache.dispose().await;
        assert_eq!(cache.state(), ManagerState::Disposed);
        assert_eq!(cache.initialize().await, ManagerState::Disposed);
        cache.dispose().await;
    }

    #[tokio::test]
    async fn test_state_receiver_sees_transitions() {
        let engine = Arc::new(MemoryEngine::new());
        let cache = manager(&engine);
        let mut rx = cache.state_receiver();
        cache.initialize().await;
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ManagerState::Ready);
    }
}
