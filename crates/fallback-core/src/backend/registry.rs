//! Backend registry: validated, immutable descriptors grouped into priority tiers.
//!
//! The registry is built once from configuration and never mutated. Reconfiguration
//! builds a new registry and swaps it in through [`RegistryHandle`]; dispatches that
//! already hold a snapshot keep using it until they finish.

use crate::{backend::errors::RegistryError, dispatch::retry::RetryConfig};
use arc_swap::ArcSwap;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::info;

/// Static description of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    /// Unique backend identity, passed to the client adapter on every call.
    pub id: Arc<str>,
    /// Lower values are tried first.
    pub priority: i64,
    /// Ordering hint within a tier; heavier backends are launched first.
    pub weight: i64,
    /// Per-attempt deadline after which the backend is treated as non-responsive.
    pub stall_timeout: Duration,
}

impl BackendDescriptor {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>, priority: i64, weight: i64, stall_timeout: Duration) -> Self {
        Self { id: id.into(), priority, weight, stall_timeout }
    }
}

/// A set of backends sharing one priority value.
///
/// Backends are ordered by descending weight, ties kept in registration order.
#[derive(Debug, Clone)]
pub struct Tier {
    priority: i64,
    backends: Vec<Arc<BackendDescriptor>>,
}

impl Tier {
    #[must_use]
    pub fn priority(&self) -> i64 {
        self.priority
    }

    #[must_use]
    pub fn backends(&self) -> &[Arc<BackendDescriptor>] {
        &self.backends
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Largest stall timeout among the tier's members.
    #[must_use]
    pub fn max_stall_timeout(&self) -> Duration {
        self.backends.iter().map(|b| b.stall_timeout).max().unwrap_or_default()
    }

    /// Total time the tier may stay active before it is declared exhausted.
    ///
    /// When the tier has more members than `max_fanout`, backends run in waves, each
    /// bounded by the largest stall timeout. Retry backoff windows are added on top.
    #[must_use]
    pub fn budget(&self, max_fanout: usize, retry: &RetryConfig) -> Duration {
        let fanout = max_fanout.max(1);
        let waves = u32::try_from(self.backends.len().div_ceil(fanout)).unwrap_or(u32::MAX);
        self.max_stall_timeout().saturating_mul(waves).saturating_add(retry.total_backoff())
    }
}

/// Validated backend set, ordered into tiers by ascending priority.
#[derive(Debug, Clone)]
pub struct Registry {
    tiers: Vec<Tier>,
    backend_count: usize,
}

impl Registry {
    /// Validates `descriptors` and groups them into tiers.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NoBackends`] if `descriptors` is empty
    /// - [`RegistryError::EmptyBackendId`] if an id is empty
    /// - [`RegistryError::DuplicateBackendId`] if two descriptors share an id
    /// - [`RegistryError::InvalidWeight`] if a weight is zero or negative
    /// - [`RegistryError::InvalidStallTimeout`] if a stall timeout is zero
    pub fn register(descriptors: Vec<BackendDescriptor>) -> Result<Self, RegistryError> {
        if descriptors.is_empty() {
            return Err(RegistryError::NoBackends);
        }

        let mut seen: HashSet<Arc<str>> = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if descriptor.id.is_empty() {
                return Err(RegistryError::EmptyBackendId);
            }
            if !seen.insert(Arc::clone(&descriptor.id)) {
                return Err(RegistryError::DuplicateBackendId(descriptor.id.to_string()));
            }
            if descriptor.weight <= 0 {
                return Err(RegistryError::InvalidWeight {
                    id: descriptor.id.to_string(),
                    weight: descriptor.weight,
                });
            }
            if descriptor.stall_timeout.is_zero() {
                return Err(RegistryError::InvalidStallTimeout(descriptor.id.to_string()));
            }
        }

        let backend_count = descriptors.len();

        // Stable sorts keep registration order for equal keys
        let mut ordered: Vec<Arc<BackendDescriptor>> =
            descriptors.into_iter().map(Arc::new).collect();
        ordered.sort_by(|a, b| b.weight.cmp(&a.weight));
        ordered.sort_by_key(|d| d.priority);

        let mut tiers: Vec<Tier> = Vec::new();
        for descriptor in ordered {
            match tiers.last_mut() {
                Some(tier) if tier.priority == descriptor.priority => tier.backends.push(descriptor),
                _ => tiers.push(Tier { priority: descriptor.priority, backends: vec![descriptor] }),
            }
        }

        Ok(Self { tiers, backend_count })
    }

    /// Tiers in the order they are activated.
    #[must_use]
    pub fn tiers_in_priority_order(&self) -> &[Tier] {
        &self.tiers
    }

    /// Total number of registered backends across all tiers.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backend_count
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<BackendDescriptor>> {
        self.tiers.iter().flat_map(|t| t.backends.iter()).find(|b| &*b.id == id)
    }
}

/// Atomically replaceable registry snapshot.
///
/// Readers take a lock-free snapshot per dispatch. [`RegistryHandle::replace`]
/// validates the new descriptor set before publishing it, so a rejected
/// reconfiguration leaves the current registry untouched.
pub struct RegistryHandle {
    current: ArcSwap<Registry>,
}

impl RegistryHandle {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self { current: ArcSwap::from_pointee(registry) }
    }

    /// Returns the registry in effect right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Validates `descriptors` and publishes them as the new registry.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the previous registry stays in effect.
    pub fn replace(&self, descriptors: Vec<BackendDescriptor>) -> Result<Arc<Registry>, RegistryError> {
        let next = Arc::new(Registry::register(descriptors)?);
        self.current.store(Arc::clone(&next));
        info!(
            backends = next.backend_count(),
            tiers = next.tiers_in_priority_order().len(),
            "backend registry replaced"
        );
        Ok(next)
    }
}
