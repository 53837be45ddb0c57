//! Test Helper Functions and Utilities
//!
//! Common helpers for creating descriptors, policies and providers.

use super::MockBackend;
use fallback_core::{
    backend::BackendClient, dispatch::RetryConfig, BackendDescriptor, FallbackProvider,
    FallbackProviderBuilder,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};

#[must_use]
pub fn descriptor(id: &str, priority: i64, weight: i64, stall_timeout_ms: u64) -> BackendDescriptor {
    BackendDescriptor::new(id, priority, weight, Duration::from_millis(stall_timeout_ms))
}

/// Single attempt per backend, no backoff.
#[must_use]
pub fn no_retry() -> RetryConfig {
    RetryConfig { max_attempts_per_backend: 1, ..RetryConfig::default() }
}

/// Deterministic backoff: `base_ms * 2^n` capped at `max_ms`, no jitter.
#[must_use]
pub fn retry(max_attempts: u32, base_ms: u64, max_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts_per_backend: max_attempts,
        base_delay: Duration::from_millis(base_ms),
        max_delay: Duration::from_millis(max_ms),
        jitter_factor: 0.0,
    }
}

/// Builds a provider over `mock` with no retries unless `configure` sets a policy.
///
/// # Panics
///
/// Panics if the builder rejects the configuration.
pub fn provider_with(
    mock: &Arc<MockBackend>,
    descriptors: Vec<BackendDescriptor>,
    configure: impl FnOnce(FallbackProviderBuilder) -> FallbackProviderBuilder,
) -> FallbackProvider {
    let builder = FallbackProvider::builder()
        .client(Arc::clone(mock) as Arc<dyn BackendClient>)
        .backends(descriptors)
        .retry(no_retry());
    configure(builder).build().expect("provider configuration should be valid")
}

/// Creates a test block response.
#[must_use]
pub fn create_test_block(block_number: u64, timestamp: u64) -> Value {
    json!({
        "number": format!("0x{:x}", block_number),
        "hash": format!("0x{:064x}", block_number),
        "parentHash": format!("0x{:064x}", block_number.saturating_sub(1)),
        "timestamp": format!("0x{:x}", timestamp),
        "transactions": [
            {
                "hash": format!("0x{:064x}", block_number * 1000),
                "gasPrice": "0x1",
                "value": "0x0"
            }
        ],
        "gasUsed": "0x5208"
    })
}
