//! Value codecs for the durable tier.
//!
//! L2 stores opaque bytes; a [`ValueCodec`] turns typed values into those
//! bytes and back. The encoded length also serves as the L1 size estimate.
//!
//! - [`JsonCodec`]: plain `serde_json` (default)
//! - [`ZstdJsonCodec`]: zstd-compressed JSON (`compression` feature). Decoding
//!   sniffs the zstd magic bytes, so rows written by `JsonCodec` before the
//!   switch still decode.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("compression failed: {0}")]
    Compression(String),
}

pub trait ValueCodec: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl ValueCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Zstd magic bytes (little-endian 0xFD2FB528)
#[cfg(feature = "compression")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdJsonCodec {
    level: i32,
}

#[cfg(feature = "compression")]
impl Default for ZstdJsonCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "compression")]
impl ZstdJsonCodec {
    /// Level 1-22; higher compresses better and slower.
    #[must_use]
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_compressed(data: &[u8]) -> bool {
        data.len() >= 4 && data[..4] == ZSTD_MAGIC
    }
}

#[cfg(feature = "compression")]
impl ValueCodec for ZstdJsonCodec {
    fn name(&self) -> &'static str {
        "zstd-json"
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        zstd::encode_all(json.as_slice(), self.level).map_err(|e| CodecError::Compression(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        if Self::is_compressed(bytes) {
            let json = zstd::decode_all(bytes).map_err(|e| CodecError::Compression(e.to_string()))?;
            serde_json::from_slice(&json).map_err(|e| CodecError::Decode(e.to_string()))
        } else {
            JsonCodec.decode(bytes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Quote {
        symbol: String,
        closes: Vec<f64>,
    }

    fn sample() -> Quote {
        Quote {
            symbol: "AAPL".into(),
            closes: vec![189.5, 190.25, 188.0],
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let bytes = JsonCodec.encode(&sample()).unwrap();
        assert_eq!(JsonCodec.decode::<Quote>(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_json_decode_wrong_shape_is_error() {
        let bytes = JsonCodec.encode(&vec![1, 2, 3]).unwrap();
        assert!(matches!(JsonCodec.decode::<Quote>(&bytes), Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_json_encode_failure_is_error() {
        // Non-string map keys cannot be JSON object keys
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], 1u8);
        assert!(matches!(JsonCodec.encode(&map), Err(CodecError::Encode(_))));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_roundtrip_and_magic() {
        let codec = ZstdJsonCodec::default();
        let bytes = codec.encode(&sample()).unwrap();
        assert!(ZstdJsonCodec::is_compressed(&bytes));
        assert_eq!(codec.decode::<Quote>(&bytes).unwrap(), sample());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_reads_plain_json() {
        let plain = JsonCodec.encode(&sample()).unwrap();
        assert!(!ZstdJsonCodec::is_compressed(&plain));
        assert_eq!(ZstdJsonCodec::default().decode::<Quote>(&plain).unwrap(), sample());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_zstd_compresses_repetitive_payloads() {
        let closes = vec![100.0f64; 2000];
        let plain = JsonCodec.encode(&closes).unwrap();
        let packed = ZstdJsonCodec::with_level(9).encode(&closes).unwrap();
        assert!(packed.len() < plain.len() / 4);
    }
}
