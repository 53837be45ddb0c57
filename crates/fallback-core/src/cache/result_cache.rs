use crate::{metrics, types::RequestFingerprint};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::trace;

/// Result cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Interval between background sweeps in milliseconds (default: 1000).
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_sweep_interval_ms() -> u64 {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { sweep_interval_ms: default_sweep_interval_ms() }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    /// Quorum the value was agreed under.
    quorum: usize,
    expires_at: Instant,
}

/// Counters describing cache behavior since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Fingerprint-keyed result cache with per-entry expiry.
///
/// An entry is never returned once `now >= expires_at`.
pub struct ResultCache {
    entries: DashMap<RequestFingerprint, CacheEntry>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResultCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the cached value if it has not expired and was resolved under a quorum
    /// of at least `min_quorum`.
    ///
    /// An expired entry found here is removed on the spot. A live entry agreed under a
    /// weaker quorum is a miss but stays cached for callers it satisfies.
    pub fn get(&self, fingerprint: &RequestFingerprint, min_quorum: usize) -> Option<Arc<Value>> {
        let now = Instant::now();

        // The shard read guard must be released before `remove_if` takes the write lock
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if now < entry.expires_at && entry.quorum >= min_quorum => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_hit();
                return Some(Arc::clone(&entry.value));
            }
            Some(entry) => now >= entry.expires_at,
            None => false,
        };

        if expired && self.entries.remove_if(fingerprint, |_, e| now >= e.expires_at).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(fingerprint = %fingerprint, "evicted expired entry on read");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
        None
    }

    /// Stores `value`, agreed under `quorum`, for `ttl`. A zero TTL stores nothing.
    ///
    /// A live entry agreed under a stronger quorum is kept.
    pub fn put(&self, fingerprint: RequestFingerprint, value: Arc<Value>, quorum: usize, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        let entry = CacheEntry { value, quorum, expires_at: now + ttl };
        self.entries
            .entry(fingerprint)
            .and_modify(|current| {
                if now >= current.expires_at || current.quorum <= quorum {
                    *current = entry.clone();
                }
            })
            .or_insert_with(|| entry.clone());
    }

    /// Checks for a live entry satisfying `min_quorum` without touching hit/miss counters.
    #[must_use]
    pub fn contains_live(&self, fingerprint: &RequestFingerprint, min_quorum: usize) -> Option<Arc<Value>> {
        let now = Instant::now();
        self.entries
            .get(fingerprint)
            .filter(|entry| now < entry.expires_at && entry.quorum >= min_quorum)
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Removes every expired entry and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
