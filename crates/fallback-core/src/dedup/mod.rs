//! Collapses concurrent identical reads into one in-flight resolution.
//!
//! # Flow
//!
//! ```text
//! execute(fingerprint, quorum)
//!       │
//!       ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit ──► cached value
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌──────────────────────┐
//! │ lock in-flight map   │ ─── entry exists ──► join as waiter
//! │ re-check cache       │ ─── hit ──► cached value
//! │ insert entry         │
//! └──────┬───────────────┘
//!        ▼
//! spawn leader task ──► request_fn ──► cache write ──► publish ──► remove entry
//! ```
//!
//! In-flight entries are keyed by fingerprint and resolved quorum. Callers only join a
//! resolution running under their own quorum, and a cached value is only served to
//! callers whose quorum it satisfies.
//!
//! Every caller, including the one that created the entry, waits on the same
//! `watch` channel, so all of them observe the identical outcome. The leader runs in
//! its own task: a caller that gives up waiting never strands the others.

mod guard;

use crate::{
    backend::errors::FallbackError,
    cache::ResultCache,
    dispatch::DispatchProgress,
    metrics,
    types::RequestFingerprint,
};
use guard::InFlightGuard;
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::watch, time::Instant};
use tracing::{debug, trace};

/// Outcome shared by every waiter of one in-flight request.
pub type SharedOutcome = Result<Arc<Value>, FallbackError>;

/// Fingerprint plus the quorum the resolution runs under.
pub(crate) type InFlightKey = (RequestFingerprint, usize);

pub(crate) type InFlightMap = Mutex<HashMap<InFlightKey, InFlightRequest>>;

/// The single active resolution for one fingerprint and quorum.
pub(crate) struct InFlightRequest {
    generation: u64,
    outcome: watch::Receiver<Option<SharedOutcome>>,
    progress: Arc<DispatchProgress>,
    waiters: Arc<AtomicUsize>,
    started_at: Instant,
}

/// Point-in-time view of an in-flight request.
#[derive(Debug, Clone)]
pub struct InFlightSnapshot {
    pub fingerprint: RequestFingerprint,
    pub quorum: usize,
    /// Tier the dispatch is currently working on.
    pub tier: usize,
    /// Backends called so far.
    pub attempted: Vec<Arc<str>>,
    /// Callers that have waited on this request, the leader included.
    pub waiters: usize,
    pub age: Duration,
}

/// At-most-one-execution-per-fingerprint-and-quorum coordinator.
pub struct RequestDeduplicator {
    inflight: Arc<InFlightMap>,
    cache: Arc<ResultCache>,
    next_generation: AtomicU64,
}

impl RequestDeduplicator {
    #[must_use]
    pub fn new(cache: Arc<ResultCache>) -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())), cache, next_generation: AtomicU64::new(0) }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Resolves `fingerprint` under `quorum`, running `request_fn` only if no identical
    /// request with the same quorum is in flight.
    ///
    /// With a non-zero `cache_ttl` the cache is consulted first and a successful outcome
    /// is written back before the in-flight entry is removed. A zero TTL skips both.
    /// Cached values agreed under a weaker quorum are not served.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `request_fn`, shared with every waiter, or
    /// [`FallbackError::Aborted`] if the leader task ended without an outcome.
    pub async fn execute<F, Fut>(
        &self,
        fingerprint: RequestFingerprint,
        quorum: usize,
        cache_ttl: Duration,
        request_fn: F,
    ) -> SharedOutcome
    where
        F: FnOnce(Arc<DispatchProgress>) -> Fut,
        Fut: Future<Output = SharedOutcome> + Send + 'static,
    {
        let use_cache = !cache_ttl.is_zero();
        if use_cache {
            if let Some(value) = self.cache.get(&fingerprint, quorum) {
                return Ok(value);
            }
        }

        let key = (fingerprint, quorum);
        let receiver = {
            let mut inflight = self.inflight.lock();

            if let Some(entry) = inflight.get(&key) {
                let waiters = entry.waiters.fetch_add(1, Ordering::Relaxed) + 1;
                metrics::record_dedup_join();
                trace!(
                    fingerprint = %key.0,
                    quorum = quorum,
                    waiters = waiters,
                    "joined in-flight request"
                );
                entry.outcome.clone()
            } else {
                // A leader may have finished between the cache miss and taking the lock
                if use_cache {
                    if let Some(value) = self.cache.contains_live(&key.0, quorum) {
                        return Ok(value);
                    }
                }

                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                let progress = Arc::new(DispatchProgress::default());
                inflight.insert(
                    key.clone(),
                    InFlightRequest {
                        generation,
                        outcome: rx.clone(),
                        progress: Arc::clone(&progress),
                        waiters: Arc::new(AtomicUsize::new(1)),
                        started_at: Instant::now(),
                    },
                );
                debug!(
                    fingerprint = %key.0,
                    quorum = quorum,
                    generation = generation,
                    "starting in-flight request"
                );

                let work = request_fn(progress);
                let guard = InFlightGuard::new(Arc::clone(&self.inflight), key.clone(), generation);
                let cache = Arc::clone(&self.cache);
                let fingerprint = key.0;
                tokio::spawn(async move {
                    let _guard = guard;
                    let outcome = work.await;
                    if use_cache {
                        if let Ok(value) = &outcome {
                            cache.put(fingerprint, Arc::clone(value), quorum, cache_ttl);
                        }
                    }
                    tx.send_replace(Some(outcome));
                });

                rx
            }
        };

        wait_for_outcome(receiver).await
    }

    /// Number of distinct fingerprint and quorum pairs currently being resolved.
    #[must_use]
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().len()
    }

    /// Returns a view of every in-flight request.
    #[must_use]
    pub fn inflight_snapshot(&self) -> Vec<InFlightSnapshot> {
        let now = Instant::now();
        self.inflight
            .lock()
            .iter()
            .map(|((fingerprint, quorum), entry)| InFlightSnapshot {
                fingerprint: fingerprint.clone(),
                quorum: *quorum,
                tier: entry.progress.current_tier(),
                attempted: entry.progress.attempted(),
                waiters: entry.waiters.load(Ordering::Relaxed),
                age: now.saturating_duration_since(entry.started_at),
            })
            .collect()
    }
}

async fn wait_for_outcome(mut receiver: watch::Receiver<Option<SharedOutcome>>) -> SharedOutcome {
    loop {
        if let Some(outcome) = receiver.borrow_and_update().as_ref() {
            return outcome.clone();
        }
        if receiver.changed().await.is_err() {
            // Sender dropped; it may still have published right before
            return receiver.borrow().clone().unwrap_or_else(|| {
                Err(FallbackError::Aborted("in-flight task ended without an outcome".into()))
            });
        }
    }
}
