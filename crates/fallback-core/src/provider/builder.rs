//! Builder pattern for constructing a `FallbackProvider`.

use super::FallbackProvider;
use crate::{
    backend::{
        client::BackendClient,
        errors::RegistryError,
        health::{HealthConfig, HealthTracker},
        registry::{BackendDescriptor, Registry, RegistryHandle},
    },
    cache::{CacheConfig, ResultCache},
    config::{AppConfig, QuorumSettings},
    dedup::RequestDeduplicator,
    dispatch::{RetryConfig, RetryController, TieredDispatcher},
    quorum::{CanonicalJsonComparator, ResponseComparator},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during provider construction.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// No [`BackendClient`] was supplied
    #[error("A backend client is required but was not provided")]
    MissingClient,

    /// The backend descriptors failed validation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Quorum, fan-out or retry settings are out of range
    #[error("Invalid provider settings: {0}")]
    InvalidSettings(String),
}

/// Builder for constructing a [`FallbackProvider`].
///
/// # Examples
///
/// ```no_run
/// # use fallback_core::{backend::BackendClient, config::AppConfig, provider::FallbackProviderBuilder};
/// # use std::sync::Arc;
/// # fn example(client: Arc<dyn BackendClient>) -> Result<(), Box<dyn std::error::Error>> {
/// let config = AppConfig::load()?;
///
/// let provider = FallbackProviderBuilder::from_config(&config)
///     .client(client)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct FallbackProviderBuilder {
    client: Option<Arc<dyn BackendClient>>,
    descriptors: Vec<BackendDescriptor>,
    settings: QuorumSettings,
    retry: RetryConfig,
    comparator: Option<Arc<dyn ResponseComparator>>,
    health: HealthConfig,
    cache: CacheConfig,
}

impl Default for FallbackProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackProviderBuilder {
    /// Creates a new builder with default settings and no backends.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            descriptors: Vec::new(),
            settings: QuorumSettings::default(),
            retry: RetryConfig::default(),
            comparator: None,
            health: HealthConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Seeds every setting from `config`. A client must still be supplied.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            client: None,
            descriptors: config.descriptors(),
            settings: config.quorum.clone(),
            retry: config.retry_config(),
            comparator: Some(config.comparator.build()),
            health: config.health.clone(),
            cache: config.cache.clone(),
        }
    }

    #[must_use]
    pub fn client(mut self, client: Arc<dyn BackendClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Replaces the backend list.
    #[must_use]
    pub fn backends(mut self, descriptors: Vec<BackendDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    #[must_use]
    pub fn backend(mut self, descriptor: BackendDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: QuorumSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the default quorum for ordinary methods (default: 1).
    #[must_use]
    pub fn quorum(mut self, quorum: usize) -> Self {
        self.settings.quorum = quorum;
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the response comparator (default: [`CanonicalJsonComparator`]).
    #[must_use]
    pub fn comparator(mut self, comparator: Arc<dyn ResponseComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    #[must_use]
    pub fn health(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    #[must_use]
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Validates the settings and assembles the provider.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError`] if no client was supplied, the backends fail registry
    /// validation, or a setting is out of range.
    pub fn build(self) -> Result<FallbackProvider, BuilderError> {
        let client = self.client.ok_or(BuilderError::MissingClient)?;
        validate_settings(&self.settings, &self.retry)?;
        let registry = Registry::register(self.descriptors)?;

        info!(
            backends = registry.backend_count(),
            tiers = registry.tiers_in_priority_order().len(),
            quorum = self.settings.quorum,
            event_quorum = self.settings.event_quorum,
            cache_timeout_ms = self.settings.cache_timeout_ms,
            "fallback provider initialized"
        );

        let comparator = self.comparator.unwrap_or_else(|| Arc::new(CanonicalJsonComparator));
        let health = Arc::new(HealthTracker::new(self.health));
        let dispatcher = Arc::new(TieredDispatcher::new(
            client,
            comparator,
            RetryController::new(self.retry),
            Arc::clone(&health),
        ));
        let dedup = RequestDeduplicator::new(Arc::new(ResultCache::new(self.cache)));

        Ok(FallbackProvider::new(RegistryHandle::new(registry), dispatcher, dedup, health, self.settings))
    }
}

fn validate_settings(settings: &QuorumSettings, retry: &RetryConfig) -> Result<(), BuilderError> {
    let invalid = |msg: &str| Err(BuilderError::InvalidSettings(msg.to_string()));

    if settings.quorum == 0 || settings.event_quorum == 0 {
        return invalid("quorum and event_quorum must be greater than 0");
    }
    if settings.max_fanout_per_tier == 0 {
        return invalid("max_fanout_per_tier must be greater than 0");
    }
    if settings.polling_interval_ms == 0 {
        return invalid("polling_interval_ms must be greater than 0");
    }
    if retry.max_attempts_per_backend == 0 {
        return invalid("max_attempts_per_backend must be greater than 0");
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return invalid("jitter_factor must be between 0.0 and 1.0");
    }
    Ok(())
}
