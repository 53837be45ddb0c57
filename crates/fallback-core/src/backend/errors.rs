use crate::types::ResponseRecord;
use std::sync::Arc;
use thiserror::Error;

/// Retry classification of a backend failure.
///
/// - Transient failures are retried with backoff on the same backend
/// - Permanent failures exhaust the backend for the current in-flight request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The same call may succeed if re-issued (timeouts, connection resets).
    Transient,
    /// Re-issuing the call cannot change the outcome.
    Permanent,
}

impl ErrorClass {
    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// Errors a backend call can produce, as classified by the client adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// The call exceeded the backend's stall timeout.
    #[error("Transport timeout")]
    TransportTimeout,

    /// Transport-level failure (connection reset, refused, broken pipe).
    #[error("Transport connection reset: {0}")]
    TransportConnReset(String),

    /// The backend rejected the request as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend does not implement the requested method.
    #[error("Method not supported: {0}")]
    MethodNotSupported(String),

    /// Any other JSON-RPC error returned by the backend.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// The call was abandoned because the request already resolved.
    #[error("Call cancelled")]
    Cancelled,
}

impl BackendError {
    /// Maps a JSON-RPC error object onto the taxonomy.
    ///
    /// Standard JSON-RPC error codes:
    /// - -32700: Parse error (the backend could not parse what we sent)
    /// - -32600: Invalid Request
    /// - -32601: Method not found
    /// - -32602: Invalid params
    ///
    /// Everything else is kept as an opaque [`BackendError::Rpc`].
    #[must_use]
    pub fn from_rpc_error(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            -32601 => Self::MethodNotSupported(message),
            -32700 | -32602 | -32600 => Self::InvalidRequest(message),
            _ => Self::Rpc { code, message },
        }
    }

    /// Returns the retry classification for this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::TransportTimeout | Self::TransportConnReset(_) => ErrorClass::Transient,
            Self::InvalidRequest(_) |
            Self::MethodNotSupported(_) |
            Self::Rpc { .. } |
            Self::Cancelled => ErrorClass::Permanent,
        }
    }

    /// Returns `true` if the call should be re-issued after a backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns `true` if retrying cannot help.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.class() == ErrorClass::Permanent
    }

    /// Returns `true` if this failure says something about the backend's health.
    ///
    /// Request-shaped errors (`InvalidRequest`, `MethodNotSupported`) are the caller's
    /// problem and cancellations are ours, so neither counts against the backend.
    #[must_use]
    pub fn should_penalize_backend(&self) -> bool {
        matches!(self, Self::TransportTimeout | Self::TransportConnReset(_) | Self::Rpc { .. })
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportTimeout => "transport_timeout",
            Self::TransportConnReset(_) => "transport_conn_reset",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MethodNotSupported(_) => "method_not_supported",
            Self::Rpc { .. } => "rpc_error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Configuration-time validation failures raised while building a [`Registry`].
///
/// [`Registry`]: crate::backend::registry::Registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two descriptors share the same id.
    #[error("Duplicate backend id: {0}")]
    DuplicateBackendId(String),

    /// A descriptor declared a weight that is zero or negative.
    #[error("Invalid weight {weight} for backend {id}: weight must be positive")]
    InvalidWeight { id: String, weight: i64 },

    /// A descriptor declared a zero stall timeout.
    #[error("Invalid stall timeout for backend {0}: must be greater than zero")]
    InvalidStallTimeout(String),

    /// A descriptor has an empty id.
    #[error("Backend id must not be empty")]
    EmptyBackendId,

    /// No descriptors were supplied.
    #[error("No backends configured")]
    NoBackends,
}

/// Errors visible to callers of [`FallbackProvider::query`].
///
/// Per-backend failures never appear here directly: they are absorbed by retries and
/// tier escalation, and only surface inside [`FallbackError::QuorumUnreachable`] as
/// diagnostics.
///
/// [`FallbackProvider::query`]: crate::provider::FallbackProvider::query
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum FallbackError {
    /// Every tier was tried and none produced a quorum.
    #[error("Quorum of {quorum} unreachable after {tiers_tried} tier(s) and {} response(s)", records.len())]
    QuorumUnreachable {
        /// Required number of matching responses.
        quorum: usize,
        /// Number of tiers that were activated.
        tiers_tried: usize,
        /// Every response (value or error) received across all tiers, in arrival order.
        records: Arc<[ResponseRecord]>,
    },

    /// The backend configuration is invalid.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The per-query options cannot be satisfied.
    #[error("Invalid query options: {0}")]
    InvalidOptions(String),

    /// The task resolving the in-flight request ended without publishing an outcome.
    #[error("In-flight request aborted: {0}")]
    Aborted(String),
}

impl FallbackError {
    /// Returns the diagnostic record set when the error is a quorum failure.
    #[must_use]
    pub fn records(&self) -> Option<&[ResponseRecord]> {
        match self {
            Self::QuorumUnreachable { records, .. } => Some(records),
            _ => None,
        }
    }

    /// Returns a static string representation for metrics labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuorumUnreachable { .. } => "quorum_unreachable",
            Self::Registry(_) => "registry_error",
            Self::InvalidOptions(_) => "invalid_options",
            Self::Aborted(_) => "aborted",
        }
    }
}
