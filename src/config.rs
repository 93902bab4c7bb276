//! Configuration for the unified cache.
//!
//! # Example
//!
//! ```
//! use unified_cache::CacheConfig;
//!
//! // Minimal config (uses defaults)
//! let config = CacheConfig::default();
//! assert_eq!(config.l1_max_entries, 10_000);
//! assert_eq!(config.l1_max_bytes, 64 * 1024 * 1024); // 64 MB
//!
//! // Tighter memory tier, faster L2 give-up
//! let config = CacheConfig {
//!     l1_max_entries: 500,
//!     l1_max_bytes: 4 * 1024 * 1024,
//!     l2_open_timeout_ms: 1_000,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::key::{validate_namespace, DEFAULT_LEGACY_PREFIXES};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid namespace '{0}'")]
    Namespace(String),
}

/// Configuration for the unified cache.
///
/// All fields have defaults, so an empty config document is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// L1 max resident entries (default: 10 000)
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: usize,

    /// L1 max bytes, summed over entry size estimates (default: 64 MB)
    #[serde(default = "default_l1_max_bytes")]
    pub l1_max_bytes: usize,

    /// TTL applied when `set` is called without one (default: none)
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,

    /// Namespace used by the un-suffixed API (`get`, `set`, ...)
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// L2 namespaces opened during `initialize()`; others open on first use
    #[serde(default = "default_l2_namespaces")]
    pub l2_namespaces: Vec<String>,

    /// Budget for each L2 namespace open before degrading (default: 3 s)
    #[serde(default = "default_l2_open_timeout_ms")]
    pub l2_open_timeout_ms: u64,

    /// sqlx URL for the durable tier (e.g. `sqlite://cache.db?mode=rwc`),
    /// read by `SqlEngine::from_config`. `None` leaves the engine choice to
    /// the caller.
    #[serde(default)]
    pub sql_url: Option<String>,

    /// Namespace holding the key migration ledger
    #[serde(default = "default_ledger_namespace")]
    pub ledger_namespace: String,

    /// Prefixes from earlier key schemes, stripped during normalization
    #[serde(default = "default_legacy_prefixes")]
    pub legacy_prefixes: Vec<String>,

    /// Rewrite non-canonical L2 keys to canonical form when L2 comes up
    #[serde(default = "default_migrate_legacy_on_init")]
    pub migrate_legacy_on_init: bool,
}

fn default_l1_max_entries() -> usize { 10_000 }
fn default_l1_max_bytes() -> usize { 64 * 1024 * 1024 } // 64 MB
fn default_namespace() -> String { "default".to_string() }
fn default_l2_namespaces() -> Vec<String> { vec![default_namespace()] }
fn default_l2_open_timeout_ms() -> u64 { 3_000 }
fn default_ledger_namespace() -> String { "__cache_key_migrations".to_string() }
fn default_legacy_prefixes() -> Vec<String> {
    DEFAULT_LEGACY_PREFIXES.iter().map(|p| (*p).to_string()).collect()
}
fn default_migrate_legacy_on_init() -> bool { true }

// Same rule the key normalizer applies, after the same trim and lowercase.
fn is_valid_namespace(ns: &str) -> bool {
    validate_namespace(&ns.trim().to_lowercase()).is_ok()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: default_l1_max_entries(),
            l1_max_bytes: default_l1_max_bytes(),
            default_ttl_secs: None,
            default_namespace: default_namespace(),
            l2_namespaces: default_l2_namespaces(),
            l2_open_timeout_ms: default_l2_open_timeout_ms(),
            sql_url: None,
            ledger_namespace: default_ledger_namespace(),
            legacy_prefixes: default_legacy_prefixes(),
            migrate_legacy_on_init: default_migrate_legacy_on_init(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.l1_max_entries == 0 {
            return Err(ConfigError::Zero("l1_max_entries"));
        }
        if self.l1_max_bytes == 0 {
            return Err(ConfigError::Zero("l1_max_bytes"));
        }
        if self.l2_open_timeout_ms == 0 {
            return Err(ConfigError::Zero("l2_open_timeout_ms"));
        }
        for ns in std::iter::once(&self.default_namespace)
            .chain(&self.l2_namespaces)
            .chain(std::iter::once(&self.ledger_namespace))
        {
            if !is_valid_namespace(ns) {
                return Err(ConfigError::Namespace(ns.clone()));
            }
        }
        Ok(())
    }

    /// Replace every invalid field with its default and lowercase namespaces.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        if self.l1_max_entries == 0 {
            self.l1_max_entries = default_l1_max_entries();
        }
        if self.l1_max_bytes == 0 {
            self.l1_max_bytes = default_l1_max_bytes();
        }
        if self.l2_open_timeout_ms == 0 {
            self.l2_open_timeout_ms = default_l2_open_timeout_ms();
        }
        if !is_valid_namespace(&self.default_namespace) {
            self.default_namespace = default_namespace();
        }
        if !is_valid_namespace(&self.ledger_namespace) {
            self.ledger_namespace = default_ledger_namespace();
        }
        self.l2_namespaces.retain(|ns| is_valid_namespace(ns));
        // Keys carry lowercased namespaces; L2 boxes must match.
        self.default_namespace = self.default_namespace.trim().to_lowercase();
        for ns in &mut self.l2_namespaces {
            *ns = ns.trim().to_lowercase();
        }
        let mut seen = HashSet::new();
        self.l2_namespaces.retain(|ns| seen.insert(ns.clone()));
        self
    }

    #[must_use]
    pub fn l2_open_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_open_timeout_ms)
    }

    #[must_use]
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}
