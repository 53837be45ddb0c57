//! # Metrics
//!
//! Prometheus counters and histograms recorded through the `metrics` facade.
//!
//! Recording is always lock-free: the free functions below forward to whatever
//! recorder is installed globally, and are no-ops when none is. [`MetricsCollector`]
//! installs the Prometheus recorder once per process and renders the text exposition.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `fallback_queries_total` | counter | `method`, `outcome` |
//! | `fallback_query_duration_seconds` | histogram | `method` |
//! | `fallback_cache_hits_total` | counter | |
//! | `fallback_cache_misses_total` | counter | |
//! | `fallback_dedup_joins_total` | counter | |
//! | `fallback_backend_calls_total` | counter | `backend`, `outcome` |
//! | `fallback_backend_retries_total` | counter | `backend` |
//! | `fallback_tier_escalations_total` | counter | |
//! | `fallback_quorum_unreachable_total` | counter | `method` |
//!
//! Backend ids are exposed as label values. Keep them free of credentials.
//! `method` labels are limited to the standard JSON-RPC read methods; any other
//! method name is recorded as `other`.

use crate::backend::errors::FallbackError;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Duration};
use tracing::warn;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Outcome label attached to `fallback_queries_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// A value was returned, fresh, joined or cached.
    Resolved,
    Unreachable,
    Aborted,
    /// Invalid options or configuration.
    Rejected,
}

impl QueryOutcome {
    #[must_use]
    pub fn of<T>(result: &Result<T, FallbackError>) -> Self {
        match result {
            Ok(_) => Self::Resolved,
            Err(FallbackError::QuorumUnreachable { .. }) => Self::Unreachable,
            Err(FallbackError::Aborted(_)) => Self::Aborted,
            Err(FallbackError::Registry(_) | FallbackError::InvalidOptions(_)) => Self::Rejected,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Unreachable => "unreachable",
            Self::Aborted => "aborted",
            Self::Rejected => "rejected",
        }
    }
}

const KNOWN_METHODS: &[&str] = &[
    "eth_blockNumber",
    "eth_call",
    "eth_chainId",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_gasPrice",
    "eth_getBalance",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockReceipts",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getCode",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_getLogs",
    "eth_getProof",
    "eth_getStorageAt",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionByHash",
    "eth_getTransactionCount",
    "eth_getTransactionReceipt",
    "eth_getUncleByBlockHashAndIndex",
    "eth_getUncleByBlockNumberAndIndex",
    "eth_maxPriorityFeePerGas",
    "eth_syncing",
    "net_version",
    "web3_clientVersion",
];

/// Maps a method name onto a bounded label set.
#[must_use]
pub fn method_label(method: &str) -> &'static str {
    KNOWN_METHODS.iter().copied().find(|known| *known == method).unwrap_or("other")
}

pub fn record_query(method: &str, outcome: QueryOutcome, elapsed: Duration) {
    let method = method_label(method);
    counter!("fallback_queries_total", "method" => method, "outcome" => outcome.as_str()).increment(1);
    histogram!("fallback_query_duration_seconds", "method" => method).record(elapsed.as_secs_f64());
}

pub fn record_cache_hit() {
    counter!("fallback_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("fallback_cache_misses_total").increment(1);
}

pub fn record_dedup_join() {
    counter!("fallback_dedup_joins_total").increment(1);
}

/// `outcome` is `"success"` or an error class label.
pub fn record_backend_call(backend: &str, outcome: &str) {
    counter!(
        "fallback_backend_calls_total",
        "backend" => backend.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_backend_retry(backend: &str) {
    counter!("fallback_backend_retries_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_tier_escalation() {
    counter!("fallback_tier_escalations_total").increment(1);
}

pub fn record_quorum_unreachable(method: &str) {
    counter!("fallback_quorum_unreachable_total", "method" => method_label(method)).increment(1);
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                // Another recorder already owns the global slot; keep a detached one so
                // rendering still works even though nothing reaches it.
                warn!(error = %e, "failed to install global Prometheus recorder");
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// Handle to the process-wide Prometheus recorder.
#[derive(Clone)]
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    /// Installs the Prometheus recorder on first use and returns a handle to it.
    #[must_use]
    pub fn install() -> Self {
        Self { prometheus_handle: init_prometheus_recorder() }
    }

    /// Renders every recorded metric in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}
