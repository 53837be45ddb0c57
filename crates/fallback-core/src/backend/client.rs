use crate::backend::errors::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Transport boundary: sends one JSON-RPC request to a named backend.
///
/// Implementations own the wire protocol (HTTP, WebSocket, in-process mocks) and must
/// classify every failure into [`BackendError`]. They should return promptly once
/// `ctx` is cancelled or `deadline` passes; the dispatcher enforces both anyway and
/// drops whatever a late call produces.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn call(
        &self,
        ctx: CancellationToken,
        backend_id: &str,
        method: &str,
        params: &Value,
        deadline: Instant,
    ) -> Result<Value, BackendError>;
}
