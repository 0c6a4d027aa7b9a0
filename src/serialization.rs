// src/serialization.rs

//! The one configured binary serializer used for every Cache Entry payload
//! (spec §6): a length-prefixed, schema-versioned envelope. TTL is set by
//! the cache store itself and is never embedded in the payload.

use bincode::config::Configuration;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CoreError, CoreResult};

/// The current schema version written by this build. Bumped whenever the
/// envelope's own framing (not the caller's payload type) changes shape.
pub const SCHEMA_VERSION: u8 = 1;

const BINCODE_CONFIG: Configuration = bincode::config::standard();

/// Encodes a value into the versioned binary envelope: one version byte
/// followed by the `bincode`-encoded payload. The store's own length
/// framing (RESP bulk strings, a document store's binary field, etc.)
/// provides the "length-prefixed" half of the format; this module owns the
/// "schema-versioned" half.
pub fn encode<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    buf.push(SCHEMA_VERSION);
    bincode::serde::encode_into_std_write(value, &mut buf, BINCODE_CONFIG)
        .map_err(|e| CoreError::Internal(format!("serialization failed: {e}")))?;
    Ok(buf)
}

/// Decodes a value previously written by [`encode`]. Rejects envelopes
/// written with a schema version newer than this build understands.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    let (version, payload) = bytes
        .split_first()
        .ok_or_else(|| CoreError::Internal("empty cache payload envelope".into()))?;
    if *version > SCHEMA_VERSION {
        return Err(CoreError::Internal(format!(
            "cache payload schema version {version} is newer than this build supports ({SCHEMA_VERSION})"
        )));
    }
    let (value, _) = bincode::serde::decode_from_slice(payload, BINCODE_CONFIG)
        .map_err(|e| CoreError::Internal(format!("deserialization failed: {e}")))?;
    Ok(value)
}

/// A SHA-256 fingerprint of an already-serialized payload, used by the
/// Conflict Detector (C6) to let callers detect no-op writes without
/// comparing full payloads.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn round_trips() {
        let sample = Sample {
            a: 7,
            b: "hello".into(),
        };
        let encoded = encode(&sample).unwrap();
        let decoded: Sample = decode(&encoded).unwrap();
        assert_eq!(sample, decoded);
    }

    #[test]
    fn rejects_future_schema_version() {
        let mut encoded = encode(&Sample {
            a: 1,
            b: "x".into(),
        })
        .unwrap();
        encoded[0] = SCHEMA_VERSION + 1;
        let result: CoreResult<Sample> = decode(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn digest_is_stable_and_sensitive_to_content() {
        let a = encode(&Sample {
            a: 1,
            b: "x".into(),
        })
        .unwrap();
        let b = encode(&Sample {
            a: 2,
            b: "x".into(),
        })
        .unwrap();
        assert_eq!(digest(&a), digest(&a));
        assert_ne!(digest(&a), digest(&b));
    }
}
