//! Structural JSON hashing and canonicalization.
//!
//! Backends return the same logical value with different object key orders, so
//! everything that keys on a JSON value (request fingerprints, quorum buckets) goes
//! through the helpers here instead of hashing serialized text.
//!
//! - [`hash_json_value`] hashes a value structurally with type discriminants
//! - [`canonical_json`] renders a value with sorted keys, used as the fingerprint text
//! - [`hash_json_value_masked`] and [`strip_masked_fields`] drop configured field paths
//!   before hashing or comparing, for responses carrying backend-specific fields

use ahash::AHasher;
use serde_json::Value;
use std::{
    fmt::Write as _,
    hash::{Hash, Hasher},
};

/// Hash a `serde_json::Value` directly without serialization.
///
/// Each JSON type is prefixed with a discriminant byte to prevent collisions:
/// - Null: 0u8
/// - Bool: 1u8 + bool value
/// - Number: 2u8 + number representation
/// - String: 3u8 + bytes
/// - Array: 4u8 + length + each element
/// - Object: 5u8 + length + sorted (key, value) pairs
///
/// Object keys are visited in sorted order, so `{"a":1,"b":2}` and `{"b":2,"a":1}`
/// hash identically.
pub fn hash_json_value(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            hash_number(n, hasher);
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(arr) => {
            4u8.hash(hasher);
            arr.len().hash(hasher);
            for element in arr {
                hash_json_value(element, hasher);
            }
        }
        Value::Object(obj) => {
            5u8.hash(hasher);
            obj.len().hash(hasher);

            let mut sorted: Vec<(&String, &Value)> = obj.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, value) in sorted {
                key.hash(hasher);
                hash_json_value(value, hasher);
            }
        }
    }
}

fn hash_number(n: &serde_json::Number, hasher: &mut impl Hasher) {
    if let Some(i) = n.as_i64() {
        0u8.hash(hasher);
        i.hash(hasher);
    } else if let Some(u) = n.as_u64() {
        1u8.hash(hasher);
        u.hash(hasher);
    } else if let Some(f) = n.as_f64() {
        2u8.hash(hasher);
        // serde_json never yields NaN/inf from parsing, but values built in code can
        let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
        bits.hash(hasher);
    }
}

/// Returns the structural hash of `value` as a `u64`.
#[must_use]
pub fn json_value_hash(value: &Value) -> u64 {
    let mut hasher = AHasher::default();
    hash_json_value(value, &mut hasher);
    hasher.finish()
}

/// Renders `value` as compact JSON with object keys sorted at every level.
///
/// Two values that are structurally equal always produce the same string,
/// independent of how the underlying map orders its keys.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::with_capacity(64);
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(arr) => {
            out.push('[');
            for (idx, element) in arr.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(element, out);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let mut sorted: Vec<(&String, &Value)> = obj.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (idx, (key, value)) in sorted.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                // Display on a string Value produces the escaped JSON literal
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// Hash a value while skipping every field path matched by `mask`.
///
/// Field paths support:
/// - Simple paths: `"timestamp"`
/// - Nested paths: `"block.timestamp"`
/// - Wildcard segments: `"transactions.*.gasPrice"` matches every array element
/// - Trailing wildcards: `"uncles.*"` matches everything below `uncles`
#[must_use]
pub fn hash_json_value_masked(value: &Value, mask: &[String]) -> u64 {
    if mask.is_empty() {
        return json_value_hash(value);
    }
    let mut hasher = AHasher::default();
    let mut path = String::with_capacity(64);
    hash_masked_internal(value, mask, &mut hasher, &mut path);
    hasher.finish()
}

/// Walks the value with a reusable path buffer.
///
/// The buffer is truncated back to its entry length before returning.
fn hash_masked_internal(value: &Value, mask: &[String], hasher: &mut impl Hasher, path: &mut String) {
    match value {
        Value::Array(arr) => {
            4u8.hash(hasher);
            let base_len = path.len();
            let kept: Vec<(usize, &Value)> = arr
                .iter()
                .enumerate()
                .filter(|(idx, _)| {
                    push_segment(path, base_len, &idx.to_string());
                    !is_masked(path, mask)
                })
                .collect();
            kept.len().hash(hasher);
            for (idx, element) in kept {
                push_segment(path, base_len, &idx.to_string());
                hash_masked_internal(element, mask, hasher, path);
            }
            path.truncate(base_len);
        }
        Value::Object(obj) => {
            5u8.hash(hasher);
            let base_len = path.len();
            let mut kept: Vec<(&String, &Value)> = obj
                .iter()
                .filter(|(key, _)| {
                    push_segment(path, base_len, key);
                    !is_masked(path, mask)
                })
                .collect();
            kept.sort_unstable_by(|a, b| a.0.cmp(b.0));
            kept.len().hash(hasher);
            for (key, value) in kept {
                key.hash(hasher);
                push_segment(path, base_len, key);
                hash_masked_internal(value, mask, hasher, path);
            }
            path.truncate(base_len);
        }
        scalar => hash_json_value(scalar, hasher),
    }
}

/// Returns a copy of `value` with every masked field path removed.
///
/// Used to confirm equivalence of two masked responses after their hashes collide.
#[must_use]
pub fn strip_masked_fields(value: &Value, mask: &[String]) -> Value {
    if mask.is_empty() {
        return value.clone();
    }
    let mut path = String::with_capacity(64);
    strip_internal(value, mask, &mut path)
}

fn strip_internal(value: &Value, mask: &[String], path: &mut String) -> Value {
    let base_len = path.len();
    let stripped = match value {
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for (idx, element) in arr.iter().enumerate() {
                push_segment(path, base_len, &idx.to_string());
                if !is_masked(path, mask) {
                    out.push(strip_internal(element, mask, path));
                }
            }
            Value::Array(out)
        }
        Value::Object(obj) => {
            let mut out = serde_json::Map::with_capacity(obj.len());
            for (key, element) in obj {
                push_segment(path, base_len, key);
                if !is_masked(path, mask) {
                    out.insert(key.clone(), strip_internal(element, mask, path));
                }
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    };
    path.truncate(base_len);
    stripped
}

fn push_segment(path: &mut String, base_len: usize, segment: &str) {
    path.truncate(base_len);
    if base_len > 0 {
        path.push('.');
    }
    path.push_str(segment);
}

/// Check if a path is matched by any entry of the mask.
fn is_masked(path: &str, mask: &[String]) -> bool {
    mask.iter().any(|pattern| {
        path == pattern || (pattern.contains('*') && matches_wildcard_pattern(path, pattern))
    })
}

/// Matches a path against a wildcard pattern.
/// `*` matches any single segment (between dots).
fn matches_wildcard_pattern(path: &str, pattern: &str) -> bool {
    let path_segments: Vec<&str> = path.split('.').collect();
    let pattern_segments: Vec<&str> = pattern.split('.').collect();

    if pattern.ends_with(".*") {
        let prefix = &pattern_segments[..pattern_segments.len() - 1];
        return path_segments.len() > prefix.len() &&
            prefix.iter().zip(&path_segments).all(|(pat, seg)| *pat == "*" || pat == seg);
    }

    path_segments.len() == pattern_segments.len() &&
        pattern_segments.iter().zip(&path_segments).all(|(pat, seg)| *pat == "*" || pat == seg)
}
