//! Consecutive-failure tracking with cool-down windows.
//!
//! Counts consecutive penalizing failures per backend. When a backend reaches the
//! failure threshold it enters a cool-down window. The dispatcher consults the tracker
//! read-only when ordering a tier: cooling-down backends are launched after healthy
//! ones but are never removed, so tier sizes and quorum arithmetic stay unchanged.
//!
//! # Example Configuration
//!
//! ```toml
//! [health]
//! enabled = true
//! failure_threshold = 3
//! cooldown_ms = 30000
//! ```

use crate::backend::registry::BackendDescriptor;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for health tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// When disabled, tier order is never adjusted.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Consecutive failures before a cool-down starts (default: 3).
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Length of the cool-down window in milliseconds (default: 30000).
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl HealthConfig {
    /// Returns the cool-down window as a Duration.
    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Default)]
struct BackendHealth {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

impl BackendHealth {
    fn is_cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Point-in-time view of one backend's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub consecutive_failures: u32,
    pub cooling_down: bool,
}

/// Tracks backend health across requests.
///
/// Thread-safe: uses `parking_lot::RwLock`; no lock is held across an await point.
pub struct HealthTracker {
    config: HealthConfig,
    backends: RwLock<HashMap<Arc<str>, BackendHealth>>,
}

impl HealthTracker {
    #[must_use]
    pub fn new(config: HealthConfig) -> Self {
        Self { config, backends: RwLock::new(HashMap::new()) }
    }

    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Records a successful call, clearing any failure streak and cool-down.
    pub fn record_success(&self, backend_id: &Arc<str>) {
        if !self.config.enabled {
            return;
        }
        let mut backends = self.backends.write();
        if let Some(health) = backends.get_mut(backend_id) {
            if health.cooldown_until.take().is_some() {
                info!(backend = %backend_id, "backend recovered from cool-down");
            }
            health.consecutive_failures = 0;
        }
    }

    /// Records a penalizing failure.
    ///
    /// Returns `true` if this failure started a cool-down.
    pub fn record_failure(&self, backend_id: &Arc<str>) -> bool {
        if !self.config.enabled {
            return false;
        }
        let now = Instant::now();
        let mut backends = self.backends.write();
        let health = backends.entry(Arc::clone(backend_id)).or_default();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);

        debug!(
            backend = %backend_id,
            consecutive_failures = health.consecutive_failures,
            threshold = self.config.failure_threshold,
            "recorded backend failure"
        );

        if health.consecutive_failures >= self.config.failure_threshold &&
            !health.is_cooling_down(now)
        {
            health.cooldown_until = Some(now + self.config.cooldown());
            info!(
                backend = %backend_id,
                consecutive_failures = health.consecutive_failures,
                cooldown_ms = self.config.cooldown_ms,
                "backend entered cool-down"
            );
            return true;
        }
        false
    }

    /// Returns `true` if the backend is inside a cool-down window.
    #[must_use]
    pub fn is_cooling_down(&self, backend_id: &str) -> bool {
        let now = Instant::now();
        self.backends.read().get(backend_id).is_some_and(|h| h.is_cooling_down(now))
    }

    #[must_use]
    pub fn snapshot(&self, backend_id: &str) -> HealthSnapshot {
        let now = Instant::now();
        self.backends.read().get(backend_id).map_or(
            HealthSnapshot { consecutive_failures: 0, cooling_down: false },
            |h| HealthSnapshot {
                consecutive_failures: h.consecutive_failures,
                cooling_down: h.is_cooling_down(now),
            },
        )
    }

    /// Returns the tier's launch order: healthy backends first, cooling-down ones last.
    ///
    /// Relative order inside each group is preserved.
    #[must_use]
    pub fn order(&self, backends: &[Arc<BackendDescriptor>]) -> Vec<Arc<BackendDescriptor>> {
        let mut ordered = backends.to_vec();
        if !self.config.enabled {
            return ordered;
        }
        let now = Instant::now();
        let state = self.backends.read();
        ordered.sort_by_key(|b| state.get(&b.id).is_some_and(|h| h.is_cooling_down(now)));
        ordered
    }
}
