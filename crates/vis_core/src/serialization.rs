//! Canonical JSON for persisted artifacts
//!
//! Object keys are sorted at every depth and the output is compact, so a
//! given fitted state always produces the same bytes and the same BLAKE3
//! digest.

use serde::Serialize;
use serde_json::{Map, Value};

/// Sort object keys in place, recursing into arrays and nested objects
fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::with_capacity(entries.len());
            for (key, mut inner) in entries {
                sort_keys(&mut inner);
                sorted.insert(key, inner);
            }
            *map = sorted;
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// Compact JSON with sorted keys
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut tree = serde_json::to_value(value)?;
    sort_keys(&mut tree);
    serde_json::to_string(&tree)
}

/// Hex-encoded BLAKE3 digest of `bytes`
pub fn blake3_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// Canonical JSON of `value` together with its digest
pub fn canonical_digest<T: Serialize>(value: &T) -> Result<(String, String), serde_json::Error> {
    let json = canonical_json_string(value)?;
    let digest = blake3_hex(json.as_bytes());
    Ok((json, digest))
}
