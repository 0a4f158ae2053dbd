//! ieim_common
//!
//! Canonical JSON serialization, SHA-256 decision-hashing, shared error
//! taxonomy, timestamp formatting, and process configuration.
//!
//! Every stage in the pipeline hashes its decision inputs through
//! `canonical_json_bytes`. Hashes must never be computed over pretty-printed
//! or field-order-dependent bytes.

pub mod config;
pub mod error;
pub mod timestamp;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("non-finite number cannot be canonicalized")]
    NonFiniteNumber,
}

/// Serialize to canonical JSON bytes (RFC 8785-style JCS):
/// - object keys sorted lexicographically
/// - no insignificant whitespace
/// - UTF-8, with `"`/`\`/control characters escaped by serde_json's default
///   string escaper (already `\uXXXX`-compatible)
/// - numbers as emitted by `serde_json`, which already omits trailing
///   fractional zeros and normalizes `-0.0` for our score-shaped floats
///   (all decision-hash floats are pre-quantized to two decimal places
///   before reaching this function; see `ieim_identity`).
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    reject_non_finite(&v)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// `decision_hash(x) = "sha256:" + hex(sha256(jcs(x)))`.
pub fn decision_hash<T: Serialize>(value: &T) -> Result<String, CanonError> {
    sha256_canonical_json(value)
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(digest))
}

/// The all-zero genesis hash used as `prev_event_hash` for the first line
/// of an audit log file.
pub fn genesis_hash() -> String {
    format!("sha256:{}", "0".repeat(64))
}

fn reject_non_finite(v: &serde_json::Value) -> Result<(), CanonError> {
    match v {
        serde_json::Value::Number(n) => {
            if let Some(f) = n.as_f64() {
                if !f.is_finite() {
                    return Err(CanonError::NonFiniteNumber);
                }
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                reject_non_finite(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Obj {
        b: u32,
        a: u32,
    }

    #[test]
    fn canonical_hash_is_stable_under_field_order() {
        let x = Obj { b: 2, a: 1 };
        let y = Obj { a: 1, b: 2 };
        let hx = sha256_canonical_json(&x).unwrap();
        let hy = sha256_canonical_json(&y).unwrap();
        assert_eq!(hx, hy);
    }

    #[test]
    fn genesis_hash_is_64_zero_hex_chars() {
        let g = genesis_hash();
        assert_eq!(g, format!("sha256:{}", "0".repeat(64)));
    }
}
