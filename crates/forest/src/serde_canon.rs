//! Canonical JSON serialization for forest fingerprints
//!
//! Object keys are sorted recursively and no whitespace is emitted, so two
//! forests with identical content always hash to the same BLAKE3 digest.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CanonicalError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Serialize a value to canonical JSON (sorted keys, no whitespace)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    let json_value =
        serde_json::to_value(value).map_err(|e| CanonicalError::Serialization(e.to_string()))?;

    serde_json::to_string(&canonicalize_value(json_value))
        .map_err(|e| CanonicalError::Serialization(e.to_string()))
}

fn canonicalize_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize_value(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize_value).collect()),
        other => other,
    }
}

/// BLAKE3 digest of the canonical JSON form
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<[u8; 32], CanonicalError> {
    let json = to_canonical_json(value)?;
    Ok(*blake3::hash(json.as_bytes()).as_bytes())
}

/// BLAKE3 digest of the canonical JSON form, hex encoded
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String, CanonicalError> {
    Ok(hex::encode(hash_canonical(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let value = json!({"trees": [{"b": 1, "a": 2}], "feature_names": ["x"]});
        let json = to_canonical_json(&value).unwrap();
        assert_eq!(json, r#"{"feature_names":["x"],"trees":[{"a":2,"b":1}]}"#);
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let first = json!({"n_estimators": 1, "trees": []});
        let second = json!({"trees": [], "n_estimators": 1});

        let h1 = hash_canonical_hex(&first).unwrap();
        let h2 = hash_canonical_hex(&second).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn different_content_changes_hash() {
        let h1 = hash_canonical_hex(&json!({"threshold": 0.5})).unwrap();
        let h2 = hash_canonical_hex(&json!({"threshold": 0.25})).unwrap();
        assert_ne!(h1, h2);
    }
}
