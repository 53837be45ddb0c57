//! Caller-facing client API.
//!
//! [`FallbackProvider::query`] resolves one read request:
//!
//! 1. Per-query options are merged with the configured defaults and validated
//! 2. The request is fingerprinted from its method and canonical params
//! 3. The deduplicator answers from the cache, joins an identical in-flight
//!    request, or starts a new dispatch against the current registry snapshot
//!
//! The provider is cheap to clone; clones share every component.

mod builder;

pub use builder::{BuilderError, FallbackProviderBuilder};

use crate::{
    backend::{
        errors::{FallbackError, RegistryError},
        health::{HealthSnapshot, HealthTracker},
        registry::{BackendDescriptor, Registry, RegistryHandle},
    },
    cache::CacheStats,
    config::QuorumSettings,
    dedup::{InFlightSnapshot, RequestDeduplicator},
    dispatch::{DispatchRequest, TieredDispatcher},
    metrics::{self, QueryOutcome},
    poller::PollHandle,
    types::{QueryOptions, RequestFingerprint},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle, time::Instant};
use tracing::{debug, warn};

/// Options resolved against the configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EffectiveOptions {
    pub quorum: usize,
    pub cache_ttl: Duration,
    pub max_fanout: usize,
}

struct ProviderInner {
    registry: RegistryHandle,
    dispatcher: Arc<TieredDispatcher>,
    dedup: RequestDeduplicator,
    health: Arc<HealthTracker>,
    settings: QuorumSettings,
}

/// Multi-backend read client with tiered fallback and quorum resolution.
#[derive(Clone)]
pub struct FallbackProvider {
    inner: Arc<ProviderInner>,
}

impl FallbackProvider {
    #[must_use]
    pub fn builder() -> FallbackProviderBuilder {
        FallbackProviderBuilder::new()
    }

    pub(super) fn new(
        registry: RegistryHandle,
        dispatcher: Arc<TieredDispatcher>,
        dedup: RequestDeduplicator,
        health: Arc<HealthTracker>,
        settings: QuorumSettings,
    ) -> Self {
        Self { inner: Arc::new(ProviderInner { registry, dispatcher, dedup, health, settings }) }
    }

    /// Resolves `method(params)` to a quorum-agreed value.
    ///
    /// # Errors
    ///
    /// - [`FallbackError::InvalidOptions`] if the effective quorum or fan-out is zero
    /// - [`FallbackError::QuorumUnreachable`] if no tier produced a quorum
    /// - [`FallbackError::Aborted`] if the dispatch task died without an outcome
    pub async fn query(
        &self,
        method: &str,
        params: Value,
        opts: QueryOptions,
    ) -> Result<Value, FallbackError> {
        let started = Instant::now();
        let result = self.query_shared(method, params, opts).await;
        metrics::record_query(method, QueryOutcome::of(&result), started.elapsed());
        result.map(Arc::unwrap_or_clone)
    }

    pub(crate) async fn query_shared(
        &self,
        method: &str,
        params: Value,
        opts: QueryOptions,
    ) -> Result<Arc<Value>, FallbackError> {
        let effective = self.resolve_options(method, opts)?;
        let fingerprint = RequestFingerprint::new(method, &params);

        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let registry = self.inner.registry.snapshot();
        let request = DispatchRequest {
            method: Arc::from(method),
            params: Arc::new(params),
            quorum: effective.quorum,
            max_fanout: effective.max_fanout,
        };

        debug!(
            method = %method,
            fingerprint = %fingerprint,
            quorum = effective.quorum,
            cache_ttl_ms = effective.cache_ttl.as_millis(),
            "query"
        );

        self.inner
            .dedup
            .execute(fingerprint, effective.quorum, effective.cache_ttl, move |progress| async move {
                dispatcher.dispatch(&registry, &request, &progress).await.map(|resolution| resolution.value)
            })
            .await
    }

    pub(crate) fn resolve_options(
        &self,
        method: &str,
        opts: QueryOptions,
    ) -> Result<EffectiveOptions, FallbackError> {
        let settings = &self.inner.settings;
        let quorum = if settings.is_event_method(method) {
            opts.event_quorum.unwrap_or(settings.event_quorum)
        } else {
            opts.quorum.unwrap_or(settings.quorum)
        };
        if quorum == 0 {
            return Err(FallbackError::InvalidOptions("quorum must be at least 1".to_string()));
        }

        let max_fanout = opts.max_fanout_per_tier.unwrap_or(settings.max_fanout_per_tier);
        if max_fanout == 0 {
            return Err(FallbackError::InvalidOptions(
                "max_fanout_per_tier must be at least 1".to_string(),
            ));
        }

        Ok(EffectiveOptions {
            quorum,
            cache_ttl: opts.cache_ttl.unwrap_or_else(|| settings.cache_timeout()),
            max_fanout,
        })
    }

    /// Re-queries `method(params)` every polling interval until the handle is stopped
    /// or dropped. Only changed values are published.
    #[must_use]
    pub fn watch(&self, method: &str, params: Value, opts: QueryOptions) -> PollHandle {
        PollHandle::spawn(self.clone(), method.to_string(), params, opts, self.inner.settings.polling_interval())
    }

    /// Validates `descriptors` and swaps them in as the new registry.
    ///
    /// Dispatches already running keep the snapshot they started with.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the current registry stays in effect.
    pub fn reconfigure(&self, descriptors: Vec<BackendDescriptor>) -> Result<(), RegistryError> {
        self.inner.registry.replace(descriptors).map(|_| ()).inspect_err(|e| {
            warn!(error = %e, "rejected backend reconfiguration");
        })
    }

    /// Spawns the cache sweeper. It stops when `shutdown_tx` broadcasts.
    pub fn start_background_tasks(&self, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![self.inner.dedup.cache().start_sweeper(shutdown_tx.subscribe())]
    }

    /// Registry snapshot currently used for new dispatches.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        self.inner.registry.snapshot()
    }

    #[must_use]
    pub fn settings(&self) -> &QuorumSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn backend_health(&self, backend_id: &str) -> HealthSnapshot {
        self.inner.health.snapshot(backend_id)
    }

    #[must_use]
    pub fn inflight_snapshot(&self) -> Vec<InFlightSnapshot> {
        self.inner.dedup.inflight_snapshot()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.dedup.cache().stats()
    }
}

impl std::fmt::Debug for FallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.snapshot();
        f.debug_struct("FallbackProvider")
            .field("backends", &registry.backend_count())
            .field("tiers", &registry.tiers_in_priority_order().len())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}
