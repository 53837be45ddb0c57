//! Equality comparators used to bucket backend responses.
//!
//! Buckets are keyed by [`ResponseComparator::bucket_key`] and a candidate only joins a
//! bucket once [`ResponseComparator::equivalent`] confirms it, so a hash collision can
//! never merge two different values.

use crate::utils::json_hash::{hash_json_value_masked, json_value_hash, strip_masked_fields};
use serde_json::Value;
use std::collections::HashMap;

/// Decides which successful responses count as the same vote.
pub trait ResponseComparator: Send + Sync {
    /// Hash consistent with [`Self::equivalent`]: equivalent values must share a key.
    fn bucket_key(&self, method: &str, value: &Value) -> u64;

    /// Returns `true` if `a` and `b` are the same answer for `method`.
    fn equivalent(&self, method: &str, a: &Value, b: &Value) -> bool;
}

/// Structural deep equality; object key order never matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalJsonComparator;

impl ResponseComparator for CanonicalJsonComparator {
    fn bucket_key(&self, _method: &str, value: &Value) -> u64 {
        json_value_hash(value)
    }

    fn equivalent(&self, _method: &str, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// Structural equality after removing per-method field paths.
///
/// Used when backends legitimately disagree on fields that carry no consensus meaning,
/// such as a block `timestamp` that lags on one provider. Methods without a mask fall
/// back to plain structural equality.
///
/// ```toml
/// [comparator.ignore_fields]
/// eth_getBlockByNumber = ["timestamp", "transactions.*.gasPrice"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct FieldMaskComparator {
    ignore_fields: HashMap<String, Vec<String>>,
}

impl FieldMaskComparator {
    #[must_use]
    pub fn new(ignore_fields: HashMap<String, Vec<String>>) -> Self {
        Self { ignore_fields }
    }

    fn mask(&self, method: &str) -> &[String] {
        // Layered config sources may lowercase map keys
        self.ignore_fields
            .get(method)
            .or_else(|| {
                self.ignore_fields.iter().find(|(k, _)| k.eq_ignore_ascii_case(method)).map(|(_, v)| v)
            })
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ignore_fields.values().all(Vec::is_empty)
    }
}

impl ResponseComparator for FieldMaskComparator {
    fn bucket_key(&self, method: &str, value: &Value) -> u64 {
        hash_json_value_masked(value, self.mask(method))
    }

    fn equivalent(&self, method: &str, a: &Value, b: &Value) -> bool {
        let mask = self.mask(method);
        if mask.is_empty() {
            return a == b;
        }
        strip_masked_fields(a, mask) == strip_masked_fields(b, mask)
    }
}
