//! Core type definitions shared across dispatch, aggregation and caching.
//!
//! # Type Categories
//!
//! ## Request Identity
//! - [`RequestFingerprint`]: dedup and cache key derived from method + canonical params
//!
//! ## Responses
//! - [`ResponseRecord`]: one backend outcome (value or classified error), immutable once built
//!
//! ## Per-Query Options
//! - [`QueryOptions`]: optional overrides of the configured quorum, cache TTL and fan-out
//!
//! # Performance Notes
//!
//! Values and ids are held behind `Arc` so records can be shared between the aggregator,
//! the diagnostic record set and every deduplicated waiter without deep copies.

use crate::{backend::errors::BackendError, utils::json_hash::canonical_json};
use ahash::AHasher;
use serde_json::Value;
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::time::Instant;

/// Canonical identity of a read request.
///
/// Two requests with the same method and structurally equal params produce equal
/// fingerprints regardless of object key order. The precomputed hash makes map
/// lookups cheap; equality still compares the full canonical text.
#[derive(Clone)]
pub struct RequestFingerprint {
    method: Arc<str>,
    canonical_params: Arc<str>,
    hash: u64,
}

impl RequestFingerprint {
    /// Derives the fingerprint of `(method, params)`.
    #[must_use]
    pub fn new(method: &str, params: &Value) -> Self {
        let canonical_params: Arc<str> = Arc::from(canonical_json(params));

        let mut hasher = AHasher::default();
        method.hash(&mut hasher);
        canonical_params.hash(&mut hasher);

        Self { method: Arc::from(method), canonical_params, hash: hasher.finish() }
    }

    /// The RPC method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The params rendered as canonical JSON (sorted keys, no whitespace).
    #[must_use]
    pub fn canonical_params(&self) -> &str {
        &self.canonical_params
    }

    /// Precomputed 64-bit hash, suitable for logging.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for RequestFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash &&
            self.method == other.method &&
            self.canonical_params == other.canonical_params
    }
}

impl Eq for RequestFingerprint {}

impl Hash for RequestFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})#{:016x}", self.method, self.canonical_params, self.hash)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:016x}", self.method, self.hash)
    }
}

/// One backend outcome for an in-flight request.
///
/// Appended to the aggregation state as responses arrive and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    /// Backend that produced the outcome.
    pub backend_id: Arc<str>,
    /// The returned value, or the classified error.
    pub outcome: Result<Arc<Value>, BackendError>,
    /// When the outcome was observed by the dispatcher.
    pub received_at: Instant,
    /// Zero-based attempt index against this backend.
    pub attempt: u32,
    /// Index of the tier the backend belongs to.
    pub tier: usize,
}

impl ResponseRecord {
    /// Builds a successful record.
    #[must_use]
    pub fn success(backend_id: Arc<str>, value: Value, received_at: Instant) -> Self {
        Self { backend_id, outcome: Ok(Arc::new(value)), received_at, attempt: 0, tier: 0 }
    }

    /// Builds a failed record.
    #[must_use]
    pub fn failure(backend_id: Arc<str>, error: BackendError, received_at: Instant) -> Self {
        Self { backend_id, outcome: Err(error), received_at, attempt: 0, tier: 0 }
    }

    /// Sets the attempt index.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the tier index.
    #[must_use]
    pub fn with_tier(mut self, tier: usize) -> Self {
        self.tier = tier;
        self
    }

    /// Returns the value if the backend answered successfully.
    #[must_use]
    pub fn value(&self) -> Option<&Arc<Value>> {
        self.outcome.as_ref().ok()
    }

    /// Returns the error if the backend failed.
    #[must_use]
    pub fn error(&self) -> Option<&BackendError> {
        self.outcome.as_ref().err()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Per-query overrides of the provider's configured defaults.
///
/// Every field left as `None` falls back to the `[quorum]` configuration section.
///
/// # Example
///
/// ```
/// use fallback_core::types::QueryOptions;
/// use std::time::Duration;
///
/// let opts = QueryOptions::default()
///     .with_quorum(2)
///     .with_cache_ttl(Duration::ZERO);
/// assert_eq!(opts.quorum, Some(2));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Matching responses required for ordinary methods.
    pub quorum: Option<usize>,
    /// Matching responses required for event/log methods.
    pub event_quorum: Option<usize>,
    /// Lifetime of the memoized result. `Duration::ZERO` bypasses the cache.
    pub cache_ttl: Option<Duration>,
    /// Maximum concurrent calls within one tier.
    pub max_fanout_per_tier: Option<usize>,
}

impl QueryOptions {
    #[must_use]
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    #[must_use]
    pub fn with_event_quorum(mut self, event_quorum: usize) -> Self {
        self.event_quorum = Some(event_quorum);
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn with_max_fanout_per_tier(mut self, fanout: usize) -> Self {
        self.max_fanout_per_tier = Some(fanout);
        self
    }
}
