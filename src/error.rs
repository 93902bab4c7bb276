//! Top-level error type.
//!
//! Only [`CacheError::InvalidKey`] ever reaches callers of the cache API.
//! The other variants exist so internal layers can propagate with `?` before
//! the manager folds them into degraded behaviour.

use thiserror::Error;

use crate::codec::CodecError;
use crate::key::InvalidKeyError;
use crate::storage::{OpenError, StorageError};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),

    #[error("type mismatch for '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("serialization failed: {0}")]
    Serialization(#[from] CodecError),

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CacheError {
    /// Whether this error means "the durable tier is unavailable".
    #[must_use]
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            Self::Open(_) | Self::Storage(StorageError::EngineNotReady | StorageError::NotOpen(_))
        )
    }
}
