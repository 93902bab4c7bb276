//! Key migration API.
//!
//! - `migrate_key()` - Map one logical key to another and move its data
//! - `adopt_legacy_keys()` - Rewrite non-canonical L2 keys to canonical form

use tracing::{debug, info, warn};

use crate::codec::ValueCodec;
use crate::error::CacheError;
use crate::key::CacheKey;

use super::{ManagerState, MigrationReport, UnifiedCacheManager};

impl<C: ValueCodec> UnifiedCacheManager<C> {
    /// Map `old_key` to `new_key` within `namespace`.
    ///
    /// Records the mapping in the ledger, so later reads and writes of the
    /// old key resolve to the new one, and moves existing data from old to
    /// new in both tiers when the new key holds nothing yet. Idempotent.
    ///
    /// Returns whether the ledger changed.
    #[tracing::instrument(skip(self))]
    pub async fn migrate_key(
        &self,
        old_key: &str,
        new_key: &str,
        namespace: &str,
    ) -> Result<bool, CacheError> {
        if self.state() == ManagerState::Disposed {
            return Ok(false);
        }
        let old = self.normalizer.normalize(old_key, namespace)?;
        let new = self.normalizer.normalize(new_key, namespace)?;
        if old == new {
            return Ok(false);
        }

        let recorded = self.migrations.record_migration(old.as_str(), new.as_str()).await;
        if recorded {
            crate::metrics::record_migration("explicit");
        }

        let moved_l1 = self.l1.lock().rename(&old, new.clone());
        let moved_l2 = if self.l2_available() {
            self.move_l2_row(&old, &new).await
        } else {
            false
        };

        info!(
            old = %old,
            new = %new,
            recorded,
            moved_l1,
            moved_l2,
            "Cache key migrated"
        );
        Ok(recorded)
    }

    /// Rewrite every non-canonical key in an L2 namespace to its canonical
    /// form.
    ///
    /// A legacy row moves to its canonical key when that key is free; when it
    /// is taken, the legacy row is unreachable and is deleted. The mapping is
    /// recorded either way. Keys that do not normalize are left alone.
    /// Running it twice migrates nothing the second time.
    #[tracing::instrument(skip(self))]
    pub async fn adopt_legacy_keys(&self, namespace: &str) -> MigrationReport {
        let mut report = MigrationReport::default();
        if !self.l2_available() || namespace == self.migrations.namespace() {
            return report;
        }
        if let Err(e) = self.l2.open(namespace).await {
            debug!(namespace, error = %e, "L2 namespace unavailable, nothing to adopt");
            return report;
        }
        let keys = match self.l2.scan_keys(namespace).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(namespace, error = %e, "L2 key scan failed");
                return report;
            }
        };

        for raw in keys {
            report.scanned += 1;
            if self.normalizer.is_canonical(&raw, namespace) {
                continue;
            }
            let canonical = match self.normalizer.normalize(&raw, namespace) {
                Ok(key) => key,
                Err(e) => {
                    debug!(key = %raw, error = %e, "Legacy key does not normalize, skipped");
                    report.skipped += 1;
                    continue;
                }
            };

            if self.migrations.record_migration(&raw, canonical.as_str()).await {
                crate::metrics::record_migration("legacy");
            }
            if self.move_raw_row(namespace, &raw, &canonical).await {
                report.migrated += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    async fn move_l2_row(&self, old: &CacheKey, new: &CacheKey) -> bool {
        if old.namespace() != new.namespace() {
            // Cross-namespace moves need both boxes.
            if let Err(e) = self.l2.open(new.namespace()).await {
                debug!(namespace = new.namespace(), error = %e, "Target namespace unavailable");
                return false;
            }
        }
        if let Err(e) = self.l2.open(old.namespace()).await {
            debug!(namespace = old.namespace(), error = %e, "Source namespace unavailable");
            return false;
        }

        let slot = self.writes.slot(new.as_str());
        let moved = {
            let _guard = slot.lock.lock().await;
            let target_taken = matches!(self.l2.read(new.namespace(), new.as_str()).await, Ok(Some(_)));
            if target_taken {
                false
            } else {
                match self.l2.read(old.namespace(), old.as_str()).await {
                    Ok(Some(value)) => {
                        match self.l2.write(new.namespace(), new.as_str(), &value).await {
                            Ok(()) => {
                                if let Err(e) = self.l2.delete(old.namespace(), old.as_str()).await {
                                    warn!(key = %old, error = %e, "Old L2 row not deleted after move");
                                }
                                true
                            }
                            Err(e) => {
                                warn!(key = %new, error = %e, "L2 move failed");
                                false
                            }
                        }
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!(key = %old, error = %e, "L2 read failed during move");
                        false
                    }
                }
            }
        };
        self.writes.release(new.as_str(), slot);
        moved
    }

    // Legacy rows are stored under arbitrary strings, not CacheKeys.
    async fn move_raw_row(&self, namespace: &str, raw: &str, canonical: &CacheKey) -> bool {
        let target_ns = canonical.namespace();
        if target_ns != namespace {
            if let Err(e) = self.l2.open(target_ns).await {
                debug!(namespace = target_ns, error = %e, "Target namespace unavailable");
                return false;
            }
        }

        let slot = self.writes.slot(canonical.as_str());
        let moved = {
            let _guard = slot.lock.lock().await;
            let target_taken = matches!(
                self.l2.read(target_ns, canonical.as_str()).await,
                Ok(Some(_))
            );
            let moved = if target_taken {
                false
            } else {
                match self.l2.read(namespace, raw).await {
                    Ok(Some(value)) => self.l2.write(target_ns, canonical.as_str(), &value).await.is_ok(),
                    _ => false,
                }
            };
            if moved || target_taken {
                if let Err(e) = self.l2.delete(namespace, raw).await {
                    warn!(key = %raw, error = %e, "Legacy L2 row not deleted");
                }
            }
            moved
        };
        self.writes.release(canonical.as_str(), slot);
        moved
    }
}
