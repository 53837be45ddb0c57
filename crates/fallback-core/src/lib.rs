//! # Fallback Core
//!
//! Tiered multi-backend JSON-RPC reads with quorum resolution.
//!
//! Given a set of independent backends, each with a priority, a weight and a stall
//! timeout, a read is answered by querying the highest-priority tier concurrently,
//! waiting for enough matching responses to satisfy a quorum, and falling back to
//! lower tiers when that becomes impossible or the tier's time budget runs out.
//!
//! - **[`backend`]**: backend descriptors, the tiered registry, the client adapter
//!   trait, the error taxonomy and consecutive-failure health tracking.
//!
//! - **[`quorum`]**: response comparators and the per-tier quorum aggregator.
//!
//! - **[`dispatch`]**: the tier state machine and per-backend retry/backoff.
//!
//! - **[`dedup`]**: collapses concurrent identical requests into one dispatch.
//!
//! - **[`cache`]**: short-TTL memoization of resolved values.
//!
//! - **[`provider`]**: the caller-facing [`FallbackProvider`] and its builder.
//!
//! - **[`poller`]**: periodic re-query with change notification.
//!
//! - **[`config`]** and **[`metrics`]**: layered configuration and Prometheus metrics.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       FallbackProvider                       │
//! │  ┌──────────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │ RequestDedup     │  │ RegistryHandle  │  │   Metrics   │  │
//! │  └────────┬─────────┘  └────────┬────────┘  └──────┬──────┘  │
//! │           │                     │                  │         │
//! │  ┌────────▼─────────┐  ┌────────▼────────┐  ┌──────▼──────┐  │
//! │  │   ResultCache    │  │ TieredDispatcher│  │ Prometheus  │  │
//! │  └──────────────────┘  │ QuorumAggregator│  │  Exporter   │  │
//! │                        │ RetryController │  └─────────────┘  │
//! │                        │ HealthTracker   │                   │
//! │                        └─────────────────┘                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Request Flow
//!
//! ```text
//! query(method, params, opts)
//!       │
//!       ▼
//! ┌─────────────┐
//! │ Cache Check │ ─── Hit ──► cached value
//! └──────┬──────┘
//!        │ Miss
//!        ▼
//! ┌─────────────┐
//! │   Dedup     │ ─── in flight ──► wait for the shared outcome
//! └──────┬──────┘
//!        │ New
//!        ▼
//! ┌──────────────────┐
//! │ TierActive(0)    │ ─── quorum ──► value (cached, shared)
//! └────────┬─────────┘
//!          │ impossible / budget spent
//!          ▼
//! ┌──────────────────┐
//! │ TierActive(1..)  │ ─── quorum ──► value
//! └────────┬─────────┘
//!          │
//!          ▼
//!   QuorumUnreachable (every response attached)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! # use fallback_core::{backend::BackendClient, config::AppConfig, provider::FallbackProviderBuilder, types::QueryOptions};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<dyn BackendClient>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! let provider = FallbackProviderBuilder::from_config(&config).client(client).build()?;
//!
//! let block = provider
//!     .query("eth_blockNumber", serde_json::json!([]), QueryOptions::default().with_quorum(2))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod metrics;
pub mod poller;
pub mod provider;
pub mod quorum;
pub mod types;
pub mod utils;

pub use backend::{BackendClient, BackendDescriptor, BackendError, FallbackError, RegistryError};
pub use provider::{FallbackProvider, FallbackProviderBuilder};
pub use types::QueryOptions;
