// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite storage engine for the durable tier.
//!
//! All namespaces share one table:
//!
//! ```sql
//! CREATE TABLE cache_entries (
//!   namespace  TEXT    NOT NULL,
//!   cache_key  TEXT    NOT NULL,
//!   payload    BLOB    NOT NULL,  -- codec output, opaque here
//!   stored_at  INTEGER NOT NULL,  -- epoch millis
//!   expires_at INTEGER,           -- epoch millis, NULL = never
//!   PRIMARY KEY (namespace, cache_key)
//! )
//! ```
//!
//! ## Bootstrap
//!
//! sqlx's `Any` driver needs a one-time, process-wide driver installation.
//! That call is [`SqlEngine::bootstrap`]; until it has run,
//! [`StorageEngine::is_ready`] is false and every open fails with
//! [`StorageError::EngineNotReady`]. Callers decide when (or whether) the
//! bootstrap happens, which keeps startup ordering explicit.

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::{BoxHandle, NamespaceBox, StorageEngine, StorageError, StoredValue};
use crate::config::CacheConfig;
use crate::resilience::retry::{retry, RetryConfig};

static INSTALL_DRIVERS: Once = Once::new();

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cache_entries (
        namespace TEXT NOT NULL,
        cache_key TEXT NOT NULL,
        payload BLOB NOT NULL,
        stored_at INTEGER NOT NULL,
        expires_at INTEGER,
        PRIMARY KEY (namespace, cache_key)
    )
"#;

pub struct SqlEngine {
    url: String,
    connect_retry: RetryConfig,
    pool: Mutex<Option<AnyPool>>,
}

impl SqlEngine {
    /// Install the sqlx drivers. Idempotent and process-wide.
    pub fn bootstrap() {
        INSTALL_DRIVERS.call_once(|| {
            sqlx::any::install_default_drivers();
            info!("SQL storage drivers installed");
        });
    }

    /// Whether [`bootstrap`](Self::bootstrap) has completed in this process.
    #[must_use]
    pub fn is_bootstrapped() -> bool {
        INSTALL_DRIVERS.is_completed()
    }

    /// Engine for any sqlx `Any` URL (e.g. `sqlite://cache.db?mode=rwc`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_retry: RetryConfig::startup(),
            pool: Mutex::new(None),
        }
    }

    /// Engine for `config.sql_url`, or `None` when no URL is configured.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config.sql_url.as_deref().map(Self::new)
    }

    /// Engine backed by a SQLite file, created if missing.
    #[must_use]
    pub fn sqlite(path: impl AsRef<std::path::Path>) -> Self {
        Self::new(format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy()))
    }

    #[must_use]
    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    // Each in-memory SQLite connection is its own database.
    fn max_connections(&self) -> u32 {
        if self.url.contains(":memory:") || self.url.contains("mode=memory") {
            1
        } else {
            8
        }
    }

    async fn pool(&self) -> Result<AnyPool, StorageError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let max_connections = self.max_connections();
        let pool = retry("l2_connect", &self.connect_retry, || async {
            AnyPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .idle_timeout(Duration::from_secs(300))
                .connect(&self.url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        if self.is_sqlite() {
            for pragma in ["PRAGMA journal_mode = WAL", "PRAGMA synchronous = NORMAL"] {
                if let Err(e) = sqlx::query(pragma).execute(&pool).await {
                    warn!(error = %e, pragma, "SQLite pragma failed, continuing");
                }
            }
        }

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StorageError::Backend(format!("schema init failed: {e}")))?;

        info!(url = %self.url, max_connections, "SQL storage engine connected");
        *guard = Some(pool.clone());
        Ok(pool)
    }
}

#[async_trait]
impl StorageEngine for SqlEngine {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn is_ready(&self) -> bool {
        Self::is_bootstrapped()
    }

    async fn open_box(&self, namespace: &str) -> Result<BoxHandle, StorageError> {
        if !self.is_ready() {
            return Err(StorageError::EngineNotReady);
        }
        let pool = self.pool().await?;
        debug!(namespace, "SQL namespace opened");
        Ok(Arc::new(SqlBox {
            namespace: namespace.to_string(),
            pool,
        }))
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
            info!(url = %self.url, "SQL storage engine closed");
        }
    }
}

pub struct SqlBox {
    namespace: String,
    pool: AnyPool,
}

fn backend(e: sqlx::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

#[async_trait]
impl NamespaceBox for SqlBox {
    fn name(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        retry("l2_get", &RetryConfig::query(), || async {
            let row = sqlx::query(
                "SELECT payload, stored_at, expires_at FROM cache_entries WHERE namespace = ? AND cache_key = ?",
            )
            .bind(&self.namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

            let Some(row) = row else {
                return Ok(None);
            };
            let payload: Vec<u8> = row.try_get("payload").map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            let stored_at: i64 = row.try_get("stored_at").unwrap_or(0);
            let expires_at: Option<i64> = row.try_get("expires_at").unwrap_or(None);
            Ok(Some(StoredValue {
                payload,
                stored_at,
                expires_at,
            }))
        })
        .await
    }

    async fn put(&self, key: &str, value: &StoredValue) -> Result<(), StorageError> {
        retry("l2_put", &RetryConfig::query(), || async {
            sqlx::query(
                "INSERT INTO cache_entries (namespace, cache_key, payload, stored_at, expires_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (namespace, cache_key) DO UPDATE SET \
                 payload = excluded.payload, stored_at = excluded.stored_at, expires_at = excluded.expires_at",
            )
            .bind(&self.namespace)
            .bind(key)
            .bind(value.payload.clone())
            .bind(value.stored_at)
            .bind(value.expires_at)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND cache_key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query("SELECT cache_key FROM cache_entries WHERE namespace = ? ORDER BY cache_key")
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("cache_key").ok())
            .collect())
    }

    async fn clear(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM cache_entries WHERE namespace = ?")
            .bind(&self.namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n.max(0).unsigned_abs())
    }
}
