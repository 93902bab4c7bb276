//! L2: durable, namespaced key → bytes storage.
//!
//! - [`traits`]: the `StorageEngine` / `NamespaceBox` seams and error types
//! - [`l2`]: [`L2Store`], the timeout-bounded facade the cache talks to
//! - [`sql`]: SQLite via sqlx (production)
//! - [`memory`]: DashMap engine (tests, ephemeral caches)

pub mod l2;
pub mod memory;
pub mod sql;
pub mod traits;

pub use l2::L2Store;
pub use memory::MemoryEngine;
pub use sql::SqlEngine;
pub use traits::{BoxHandle, NamespaceBox, OpenError, StorageEngine, StorageError, StoredValue};

/// Wall-clock epoch millis, the unit for persisted timestamps.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
