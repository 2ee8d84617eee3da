//! The `RpcTransport` trait — one connection to one JSON-RPC provider.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// The async trait every provider connection implements.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and is stored as `Arc<dyn RpcTransport>` inside
/// the provider registry.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Send a JSON-RPC 2.0 batch and return the raw responses.
    ///
    /// Implementations return whatever the node sent back; ordering and
    /// completeness are checked by the batch client.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError>;

    /// Send a single request.
    ///
    /// Default implementation wraps it in a batch of one.
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.send_batch(vec![req])
            .await?
            .pop()
            .ok_or_else(|| TransportError::BatchMismatch("empty response to single request".into()))
    }

    /// Human-readable, credential-free description of the endpoint.
    fn describe(&self) -> String;
}
