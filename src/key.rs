// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key normalization.
//!
//! Keys reach the cache in whatever shape the calling code happened to build
//! them: mixed case, legacy `cache_` / `v1:` prefixes, parameters in any
//! order, pipes instead of query strings. [`KeyNormalizer`] collapses all of
//! those into one canonical form so a logical value is never fragmented
//! across two physical keys in either tier.
//!
//! Canonical form:
//!
//! ```text
//! <namespace>:<id>[?<param>&<param>...]
//! ```
//!
//! Parameters are sorted, so `quotes:aapl?interval=5m&period=1d` and
//! `Quotes_AAPL|period=1d,interval=5m` name the same entry.
//!
//! # Example
//!
//! ```
//! use unified_cache::KeyNormalizer;
//!
//! let normalizer = KeyNormalizer::default();
//! let key = normalizer.normalize("v1:AAPL?period=1d&interval=5m", "quotes").unwrap();
//! assert_eq!(key.as_str(), "quotes:aapl?interval=5m&period=1d");
//! assert_eq!(key.namespace(), "quotes");
//! assert_eq!(key.id(), "aapl");
//! assert_eq!(key.variant(), Some("interval=5m&period=1d"));
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefixes left behind by earlier key schemes.
pub const DEFAULT_LEGACY_PREFIXES: &[&str] = &["cache:", "cache_", "v1:", "v2:", "legacy:"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidKeyError {
    #[error("cache key is empty")]
    Empty,
    #[error("cache key '{0}' contains control characters")]
    Malformed(String),
    #[error("invalid namespace '{0}'")]
    InvalidNamespace(String),
}

/// Immutable canonical cache key.
///
/// Only constructed by [`KeyNormalizer::normalize`] or [`CacheKey::parse`],
/// so every instance is already canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey {
    canonical: String,
    ns_len: usize,
    variant_at: Option<usize>,
}

impl CacheKey {
    fn build(namespace: &str, id: &str, variant: Option<&str>) -> Self {
        let mut canonical = String::with_capacity(
            namespace.len() + id.len() + variant.map_or(0, |v| v.len() + 1) + 1,
        );
        canonical.push_str(namespace);
        canonical.push(':');
        canonical.push_str(id);
        let variant_at = variant.map(|v| {
            let at = canonical.len();
            canonical.push('?');
            canonical.push_str(v);
            at
        });
        Self {
            canonical,
            ns_len: namespace.len(),
            variant_at,
        }
    }

    /// Re-read a key that is already in canonical form (ledger targets,
    /// persisted keys). Does not normalize.
    pub fn parse(canonical: &str) -> Result<Self, InvalidKeyError> {
        if canonical.trim().is_empty() {
            return Err(InvalidKeyError::Empty);
        }
        let (namespace, rest) = canonical
            .split_once(':')
            .ok_or_else(|| InvalidKeyError::Malformed(canonical.to_string()))?;
        validate_namespace(namespace)?;
        let (id, variant) = match rest.split_once('?') {
            Some((id, variant)) if !variant.is_empty() => (id, Some(variant)),
            Some((id, _)) => (id, None),
            None => (rest, None),
        };
        if id.is_empty() || id.chars().any(char::is_control) {
            return Err(InvalidKeyError::Malformed(canonical.to_string()));
        }
        Ok(Self::build(namespace, id, variant))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.canonical[..self.ns_len]
    }

    #[must_use]
    pub fn id(&self) -> &str {
        let end = self.variant_at.unwrap_or(self.canonical.len());
        &self.canonical[self.ns_len + 1..end]
    }

    #[must_use]
    pub fn variant(&self) -> Option<&str> {
        self.variant_at.map(|at| &self.canonical[at + 1..])
    }

    /// Length in bytes of the canonical string.
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.canonical
    }
}

impl TryFrom<String> for CacheKey {
    type Error = InvalidKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

pub(crate) fn validate_namespace(namespace: &str) -> Result<(), InvalidKeyError> {
    let invalid = namespace.is_empty()
        || namespace
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, ':' | '?' | '|'));
    if invalid {
        return Err(InvalidKeyError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}

/// Maps raw logical keys to canonical [`CacheKey`]s.
///
/// Pure and deterministic: the same `(raw, namespace)` always yields the same
/// key, and normalizing a canonical key returns it unchanged.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    legacy_prefixes: Vec<String>,
}

impl Default for KeyNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_LEGACY_PREFIXES.iter().copied())
    }
}

impl KeyNormalizer {
    pub fn new<I, S>(legacy_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let legacy_prefixes = legacy_prefixes
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { legacy_prefixes }
    }

    pub fn normalize(&self, raw_key: &str, namespace: &str) -> Result<CacheKey, InvalidKeyError> {
        let namespace = namespace.trim().to_lowercase();
        validate_namespace(&namespace)?;

        let trimmed = raw_key.trim();
        if trimmed.is_empty() {
            return Err(InvalidKeyError::Empty);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(InvalidKeyError::Malformed(raw_key.to_string()));
        }

        let lowered = trimmed.to_lowercase();
        let body = self.strip_prefixes(&lowered, &namespace);

        let (id_part, params_part) = match body.find(['?', '|']) {
            Some(at) => (&body[..at], Some(&body[at + 1..])),
            None => (body, None),
        };

        // Collapsing can expose a prefix (`cache x` -> `cache_x`), so strip again.
        let collapsed = id_part.split_whitespace().collect::<Vec<_>>().join("_");
        let id = self.strip_prefixes(&collapsed, &namespace);
        if id.is_empty() {
            return Err(InvalidKeyError::Empty);
        }

        let variant = params_part.and_then(canonical_params);
        Ok(CacheKey::build(&namespace, id, variant.as_deref()))
    }

    /// Whether `raw_key` is already exactly its canonical form.
    #[must_use]
    pub fn is_canonical(&self, raw_key: &str, namespace: &str) -> bool {
        matches!(self.normalize(raw_key, namespace), Ok(key) if key.as_str() == raw_key)
    }

    // Runs to a fixpoint so stacked prefixes (`cache:v1:quotes:...`) all go.
    fn strip_prefixes<'a>(&self, mut body: &'a str, namespace: &str) -> &'a str {
        loop {
            let before = body.len();
            for prefix in &self.legacy_prefixes {
                if let Some(rest) = body.strip_prefix(prefix.as_str()) {
                    body = rest.trim_start();
                }
            }
            if let Some(rest) = body.strip_prefix(namespace) {
                if let Some(rest) = rest
                    .strip_prefix(':')
                    .or_else(|| rest.strip_prefix('_'))
                    .or_else(|| rest.strip_prefix('/'))
                {
                    body = rest.trim_start();
                }
            }
            if body.len() == before {
                return body;
            }
        }
    }
}

fn canonical_params(raw: &str) -> Option<String> {
    let mut params: Vec<String> = raw
        .split(['&', ',', ';', '|', '?'])
        .map(|p| p.chars().filter(|c| !c.is_whitespace()).collect::<String>())
        .filter(|p| !p.is_empty())
        .collect();
    if params.is_empty() {
        return None;
    }
    params.sort();
    Some(params.join("&"))
}
