//! Application configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: serde defaults on every section
//! 2. **Config file**: TOML file named by the `FALLBACK_CONFIG` env var (`config/config.toml`
//!    when unset)
//! 3. **Environment variables**: `FALLBACK__*` overrides, `__` separating nested fields
//!    (e.g. `FALLBACK__QUORUM__QUORUM=2`)
//!
//! # Configuration Sections
//!
//! - [`BackendConfig`]: one entry per backend (`[[backends]]`)
//! - [`QuorumSettings`]: quorum sizes, cache TTL, polling interval, fan-out
//! - [`RetrySettings`]: per-backend retry policy
//! - [`ComparatorConfig`]: fields ignored when comparing responses
//! - [`HealthConfig`]: consecutive-failure cool-down
//! - [`CacheConfig`]: background sweep interval
//! - [`LoggingConfig`]: log level and format
//!
//! # Example
//!
//! ```toml
//! [[backends]]
//! id = "primary-a"
//! priority = 0
//! weight = 2
//! stall_timeout_ms = 750
//!
//! [[backends]]
//! id = "archive"
//! priority = 1
//! stall_timeout_ms = 2000
//!
//! [quorum]
//! quorum = 1
//! cache_timeout_ms = 250
//! ```

use crate::{
    backend::{registry::BackendDescriptor, HealthConfig, Registry},
    cache::CacheConfig,
    dispatch::RetryConfig,
    quorum::{CanonicalJsonComparator, FieldMaskComparator, ResponseComparator},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

/// One backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique identifier, also used as the metrics label.
    pub id: String,

    /// Lower values are tried first (default: 0).
    #[serde(default)]
    pub priority: i64,

    /// Relative preference within a tier; must be positive (default: 1).
    #[serde(default = "default_weight")]
    pub weight: i64,

    /// Per-call stall timeout in milliseconds (default: 750).
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
}

fn default_weight() -> i64 {
    1
}

fn default_stall_timeout_ms() -> u64 {
    750
}

impl BackendConfig {
    #[must_use]
    pub fn descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::new(
            self.id.as_str(),
            self.priority,
            self.weight,
            Duration::from_millis(self.stall_timeout_ms),
        )
    }
}

/// Quorum and query defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumSettings {
    /// Matching responses required for ordinary methods (default: 1).
    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Matching responses required for methods in `event_methods` (default: 1).
    #[serde(default = "default_quorum")]
    pub event_quorum: usize,

    /// Result cache TTL in milliseconds; 0 disables caching (default: 250).
    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Interval between re-queries of a watched request (default: 4000).
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Concurrent calls per tier (default: 8).
    #[serde(default = "default_max_fanout_per_tier")]
    pub max_fanout_per_tier: usize,

    /// Methods resolved with `event_quorum`.
    #[serde(default = "default_event_methods")]
    pub event_methods: Vec<String>,
}

fn default_quorum() -> usize {
    1
}

fn default_cache_timeout_ms() -> u64 {
    250
}

fn default_polling_interval_ms() -> u64 {
    4000
}

fn default_max_fanout_per_tier() -> usize {
    8
}

fn default_event_methods() -> Vec<String> {
    ["eth_getLogs", "eth_getFilterChanges", "eth_getFilterLogs"].map(String::from).to_vec()
}

impl Default for QuorumSettings {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            event_quorum: default_quorum(),
            cache_timeout_ms: default_cache_timeout_ms(),
            polling_interval_ms: default_polling_interval_ms(),
            max_fanout_per_tier: default_max_fanout_per_tier(),
            event_methods: default_event_methods(),
        }
    }
}

impl QuorumSettings {
    #[must_use]
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }

    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Returns `true` if `method` is resolved with the event quorum.
    #[must_use]
    pub fn is_event_method(&self, method: &str) -> bool {
        self.event_methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

/// Serialized form of [`RetryConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per backend per request, the first included (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_backend: u32,

    /// Backoff after the first failed attempt in milliseconds (default: 50).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds (default: 1000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Symmetric random spread as a fraction of the delay, `0.0..=1.0` (default: 0.0).
    #[serde(default)]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts_per_backend: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts_per_backend: settings.max_attempts_per_backend,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter_factor: settings.jitter_factor,
        }
    }
}

/// Response comparison settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparatorConfig {
    /// Field paths ignored per method, e.g. `eth_getBlockByNumber = ["timestamp"]`.
    #[serde(default)]
    pub ignore_fields: HashMap<String, Vec<String>>,
}

impl ComparatorConfig {
    /// Field-masked comparator when any mask is configured, structural otherwise.
    #[must_use]
    pub fn build(&self) -> Arc<dyn ResponseComparator> {
        let masked = FieldMaskComparator::new(self.ignore_fields.clone());
        if masked.is_empty() {
            Arc::new(CanonicalJsonComparator)
        } else {
            Arc::new(masked)
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (default: `info`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty` (default: `pretty`).
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Complete configuration of a fallback provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub quorum: QuorumSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub comparator: ComparatorConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from `config_path`, then applies `FALLBACK__*` overrides.
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("quorum.quorum", 1)?
            .set_default("quorum.event_quorum", 1)?
            .set_default("quorum.cache_timeout_ms", 250)?
            .set_default("quorum.polling_interval_ms", 4000)?
            .set_default("quorum.max_fanout_per_tier", 8)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("FALLBACK").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads from `FALLBACK_CONFIG`, or `config/config.toml` when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be parsed or deserialized.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("FALLBACK_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Backend descriptors in declaration order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.backends.iter().map(BackendConfig::descriptor).collect()
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::from(&self.retry)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Backends pass registry validation (unique ids, positive weights, non-zero stall timeouts)
    /// - Quorum sizes and fan-out are at least 1
    /// - The default and event quorums each fit in at least one tier
    /// - Retry delays are ordered and the jitter factor lies in `0.0..=1.0`
    /// - Logging format is either `"json"` or `"pretty"`
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        let registry = Registry::register(self.descriptors()).map_err(|e| e.to_string())?;

        if self.quorum.quorum == 0 {
            return Err("Quorum must be greater than 0".to_string());
        }

        if self.quorum.event_quorum == 0 {
            return Err("Event quorum must be greater than 0".to_string());
        }

        if self.quorum.max_fanout_per_tier == 0 {
            return Err("Max fan-out per tier must be greater than 0".to_string());
        }

        let largest_tier =
            registry.tiers_in_priority_order().iter().map(|t| t.len()).max().unwrap_or_default();
        if self.quorum.quorum > largest_tier {
            return Err(format!(
                "Quorum {} exceeds the largest tier ({largest_tier} backends)",
                self.quorum.quorum
            ));
        }

        if self.quorum.event_quorum > largest_tier {
            return Err(format!(
                "Event quorum {} exceeds the largest tier ({largest_tier} backends)",
                self.quorum.event_quorum
            ));
        }

        if self.quorum.polling_interval_ms == 0 {
            return Err("Polling interval must be greater than 0".to_string());
        }

        if self.retry.max_attempts_per_backend == 0 {
            return Err("Max attempts per backend must be greater than 0".to_string());
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(format!(
                "Retry base delay ({}ms) exceeds max delay ({}ms)",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err("Retry jitter factor must be between 0.0 and 1.0".to_string());
        }

        if self.health.failure_threshold == 0 {
            return Err("Health failure threshold must be greater than 0".to_string());
        }

        if self.cache.sweep_interval_ms == 0 {
            return Err("Cache sweep interval must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        Ok(())
    }

    /// Example configuration with two primary backends and one archive fallback.
    #[must_use]
    pub fn sample() -> Self {
        let backend = |id: &str, priority, weight, stall_timeout_ms| BackendConfig {
            id: id.to_string(),
            priority,
            weight,
            stall_timeout_ms,
        };

        Self {
            backends: vec![
                backend("primary-a", 0, 2, 750),
                backend("primary-b", 0, 1, 750),
                backend("archive", 1, 1, 2000),
            ],
            comparator: ComparatorConfig {
                ignore_fields: HashMap::from([(
                    "eth_getBlockByNumber".to_string(),
                    vec!["timestamp".to_string()],
                )]),
            },
            ..Self::default()
        }
    }
}
