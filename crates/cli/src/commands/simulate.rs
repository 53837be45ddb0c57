//! Offline simulation: drives the full provider stack against scripted backends.
//!
//! # Scenario Format
//!
//! ```toml
//! method = "eth_getBalance"
//! params = ["0xabc", "latest"]
//! callers = 3                     # identical concurrent queries
//!
//! [options]
//! quorum = 2
//!
//! [[backends]]
//! id = "fast"
//! priority = 0
//! latency_ms = 10
//! result = "0x10"
//!
//! [[backends]]
//! id = "flaky"
//! priority = 0
//! latency_ms = 30
//! errors = ["timeout", "conn_reset"]   # first two attempts fail
//! result = "0x10"
//!
//! [[backends]]
//! id = "stuck"                    # no result: never answers
//! priority = 1
//! ```

use async_trait::async_trait;
use fallback_core::{
    config::{AppConfig, BackendConfig},
    metrics::MetricsCollector,
    BackendClient, BackendError, FallbackError, FallbackProviderBuilder, QueryOptions,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    task::JoinSet,
    time::{sleep, sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    config::load_config,
    utils::{print_error, print_success, CliError, CliResult},
};

pub struct SimulateOptions {
    pub scenario: String,
    pub config: String,
    pub metrics: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub method: String,

    #[serde(default = "default_params")]
    pub params: Value,

    #[serde(default)]
    pub options: ScenarioOptions,

    /// Identical queries issued concurrently (default: 1).
    #[serde(default = "default_callers")]
    pub callers: usize,

    pub backends: Vec<ScriptedBackend>,
}

fn default_params() -> Value {
    Value::Array(Vec::new())
}

fn default_callers() -> usize {
    1
}

/// Per-query overrides, mirroring [`QueryOptions`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioOptions {
    pub quorum: Option<usize>,
    pub event_quorum: Option<usize>,
    pub cache_ttl_ms: Option<u64>,
    pub max_fanout_per_tier: Option<usize>,
}

impl ScenarioOptions {
    fn to_query_options(&self) -> QueryOptions {
        QueryOptions {
            quorum: self.quorum,
            event_quorum: self.event_quorum,
            cache_ttl: self.cache_ttl_ms.map(Duration::from_millis),
            max_fanout_per_tier: self.max_fanout_per_tier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedBackend {
    #[serde(flatten)]
    pub backend: BackendConfig,

    /// Delay before every answer.
    #[serde(default)]
    pub latency_ms: u64,

    /// Returned once the scripted errors are used up. Without it the backend never answers.
    pub result: Option<Value>,

    /// Failures returned by the first attempts, in order.
    #[serde(default)]
    pub errors: Vec<ScriptedError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedError {
    Timeout,
    ConnReset,
    InvalidRequest,
    MethodNotSupported,
    Rpc,
}

impl ScriptedError {
    fn to_backend_error(self) -> BackendError {
        match self {
            Self::Timeout => BackendError::TransportTimeout,
            Self::ConnReset => BackendError::TransportConnReset("scripted reset".to_string()),
            Self::InvalidRequest => BackendError::from_rpc_error(-32602, "scripted invalid params"),
            Self::MethodNotSupported => BackendError::from_rpc_error(-32601, "scripted method not found"),
            Self::Rpc => BackendError::from_rpc_error(-32000, "scripted execution error"),
        }
    }
}

struct ScriptedClient {
    scripts: HashMap<String, ScriptedBackend>,
    calls: HashMap<String, AtomicUsize>,
}

impl ScriptedClient {
    fn new(backends: &[ScriptedBackend]) -> Self {
        Self {
            scripts: backends.iter().map(|b| (b.backend.id.clone(), b.clone())).collect(),
            calls: backends.iter().map(|b| (b.backend.id.clone(), AtomicUsize::new(0))).collect(),
        }
    }

    fn call_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<_> =
            self.calls.iter().map(|(id, n)| (id.clone(), n.load(Ordering::Relaxed))).collect();
        counts.sort();
        counts
    }
}

#[async_trait]
impl BackendClient for ScriptedClient {
    async fn call(
        &self,
        ctx: CancellationToken,
        backend_id: &str,
        _method: &str,
        _params: &Value,
        deadline: Instant,
    ) -> Result<Value, BackendError> {
        let Some(script) = self.scripts.get(backend_id) else {
            return Err(BackendError::TransportConnReset(format!("unknown backend {backend_id}")));
        };
        let attempt = self.calls.get(backend_id).map_or(0, |n| n.fetch_add(1, Ordering::Relaxed));

        tokio::select! {
            biased;
            () = ctx.cancelled() => return Err(BackendError::Cancelled),
            () = sleep(Duration::from_millis(script.latency_ms)) => {}
        }

        if let Some(error) = script.errors.get(attempt) {
            return Err(error.to_backend_error());
        }

        match &script.result {
            Some(value) => Ok(value.clone()),
            None => {
                tokio::select! {
                    () = ctx.cancelled() => Err(BackendError::Cancelled),
                    () = sleep_until(deadline) => Err(BackendError::TransportTimeout),
                }
            }
        }
    }
}

/// What one simulated run produced.
pub struct SimulationReport {
    pub outcomes: Vec<Result<Value, FallbackError>>,
    pub elapsed: Duration,
    /// Calls received per backend, sorted by id.
    pub calls: Vec<(String, usize)>,
}

/// Runs `scenario` against a provider built from `config`, whose backends are replaced
/// by the scenario's.
pub async fn simulate(mut config: AppConfig, scenario: Scenario) -> CliResult<SimulationReport> {
    config.backends = scenario.backends.iter().map(|b| b.backend.clone()).collect();

    let client = Arc::new(ScriptedClient::new(&scenario.backends));
    let provider = FallbackProviderBuilder::from_config(&config)
        .client(Arc::clone(&client) as Arc<dyn BackendClient>)
        .build()
        .map_err(|e| CliError::Scenario(e.to_string()))?;

    let opts = scenario.options.to_query_options();
    let started = Instant::now();
    let mut callers = JoinSet::new();
    for _ in 0..scenario.callers.max(1) {
        let provider = provider.clone();
        let method = scenario.method.clone();
        let params = scenario.params.clone();
        callers.spawn(async move { provider.query(&method, params, opts).await });
    }

    let mut outcomes = Vec::with_capacity(scenario.callers);
    while let Some(joined) = callers.join_next().await {
        outcomes.push(joined.map_err(|e| CliError::Query(e.to_string()))?);
    }

    Ok(SimulationReport { outcomes, elapsed: started.elapsed(), calls: client.call_counts() })
}

pub fn render_report(report: &SimulationReport, started: Instant) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} caller(s) finished in {}ms", report.outcomes.len(), report.elapsed.as_millis());

    match report.outcomes.first() {
        Some(Ok(value)) => {
            let _ = writeln!(out, "Result: {value}");
        }
        Some(Err(error)) => {
            let _ = writeln!(out, "Error: {error}");
            for record in error.records().unwrap_or_default() {
                let outcome = match &record.outcome {
                    Ok(value) => value.to_string(),
                    Err(e) => format!("error: {e}"),
                };
                let _ = writeln!(
                    out,
                    "  +{:>5}ms tier {} {:<16} attempt {} {outcome}",
                    record.received_at.saturating_duration_since(started).as_millis(),
                    record.tier,
                    record.backend_id,
                    record.attempt
                );
            }
        }
        None => {}
    }

    let _ = writeln!(out, "Backend calls:");
    for (id, count) in &report.calls {
        let _ = writeln!(out, "  {id:<16} {count}");
    }
    out
}

pub async fn run_simulation(options: SimulateOptions) -> CliResult<()> {
    let config = load_config(&options.config)?;
    let scenario: Scenario = toml::from_str(&std::fs::read_to_string(&options.scenario)?)?;
    let collector = options.metrics.then(MetricsCollector::install);

    info!(
        method = %scenario.method,
        backends = scenario.backends.len(),
        callers = scenario.callers,
        "running simulation"
    );

    let started = Instant::now();
    let report = simulate(config, scenario).await?;
    print!("{}", render_report(&report, started));

    if let Some(collector) = collector {
        println!("\n{}", collector.render());
    }

    match report.outcomes.into_iter().find_map(Result::err) {
        Some(error) => {
            print_error("Simulation did not reach quorum");
            Err(error.into())
        }
        None => {
            print_success("Simulation reached quorum");
            Ok(())
        }
    }
}
