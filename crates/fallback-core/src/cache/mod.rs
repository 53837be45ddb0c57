//! Short-TTL memoization of quorum-resolved results.
//!
//! # Overview
//!
//! Results are keyed by [`RequestFingerprint`](crate::types::RequestFingerprint) and live for
//! the per-query cache TTL, which is intentionally short (hundreds of milliseconds by
//! default): chain state changes every block, so the cache only absorbs bursts of
//! identical reads.
//!
//! # Eviction
//!
//! - **Lazy**: [`ResultCache::get`] removes an entry it finds expired
//! - **Periodic**: the sweeper started by [`ResultCache::start_sweeper`] removes every
//!   expired entry on a fixed interval until shutdown
//!
//! No LRU is needed; the TTL bounds how long any entry can stay.

pub mod background;
pub mod result_cache;

pub use result_cache::{CacheConfig, CacheStats, ResultCache};
