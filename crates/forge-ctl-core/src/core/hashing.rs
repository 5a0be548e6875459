// forge-ctl-core/src/core/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: Deterministic hashing for audit and optimistic-concurrency use.
// Purpose: Give every persisted blob a reproducible content hash.
// Dependencies: sha2, serde_json
// ============================================================================

//! ## Overview
//! The clarification context and critic feedback blobs are stored as JSON
//! and occasionally need a stable content hash (activity-stream dedup,
//! idempotent worker-completion replay). Hashing always goes through
//! canonical JSON so key order never perturbs the digest.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// A hex-encoded content digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct HashDigest(String);

impl HashDigest {
    /// Returns the digest as a lowercase hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Hashes raw bytes with SHA-256.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let digest = Sha256::digest(bytes);
    HashDigest(hex_encode(&digest))
}

/// Serializes `value` to canonical JSON (sorted object keys) and hashes it.
///
/// # Errors
///
/// Returns a `serde_json::Error` when `value` cannot be serialized.
pub fn hash_canonical_json<T: Serialize>(value: &T) -> Result<HashDigest, serde_json::Error> {
    let canonical = canonical_json_bytes(value)?;
    Ok(hash_bytes(&canonical))
}

/// Serializes `value` to JSON with object keys sorted, suitable for hashing
/// or content-addressed storage.
///
/// # Errors
///
/// Returns a `serde_json::Error` when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    let sorted = sort_object_keys(value);
    serde_json::to_vec(&sorted)
}

/// Recursively sorts JSON object keys so serialization is deterministic.
fn sort_object_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_object_keys(v))).collect();
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_object_keys).collect())
        }
        other => other,
    }
}

/// Encodes bytes as lowercase hex without pulling in a dedicated crate.
fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing to a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_is_key_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            canonical_json_bytes(&a).expect("hash a"),
            canonical_json_bytes(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_canonical_json_is_deterministic() {
        let value = json!({"x": [1, 2, 3]});
        let first = hash_canonical_json(&value).expect("hash");
        let second = hash_canonical_json(&value).expect("hash");
        assert_eq!(first, second);
    }
}
