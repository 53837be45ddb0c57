//! Utility functions shared by fingerprinting and quorum bucketing.
//!
//! ## JSON Hashing (`json_hash`)
//! - Structural hashing with sorted object keys
//! - Canonical rendering for request fingerprints
//! - Field-masked hashing for responses with backend-specific fields

pub mod json_hash;

pub use json_hash::{
    canonical_json, hash_json_value, hash_json_value_masked, json_value_hash, strip_masked_fields,
};
