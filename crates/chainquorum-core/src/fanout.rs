//! Fan-out batch client: one JSON-RPC batch, every provider, concurrently.
//!
//! Provider-level failures never fail the call. Each provider contributes a
//! `ProviderResult`; a timeout, a connection error or a malformed batch shows
//! up as an empty response list plus the captured error, and the quorum
//! resolver decides what to make of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::error::TransportError;
use crate::provider::{ProviderId, ProviderRegistry};
use crate::request::{IdAllocator, JsonRpcRequest, JsonRpcResponse, RpcCall, RpcId};
use crate::transport::RpcTransport;

/// What one provider returned for one batch.
#[derive(Debug)]
pub struct ProviderResult {
    pub provider: ProviderId,
    /// Responses in request order. Empty when `error` is set.
    pub responses: Vec<JsonRpcResponse>,
    pub error: Option<TransportError>,
}

impl ProviderResult {
    pub fn ok(provider: ProviderId, responses: Vec<JsonRpcResponse>) -> Self {
        Self {
            provider,
            responses,
            error: None,
        }
    }

    pub fn failed(provider: ProviderId, error: TransportError) -> Self {
        Self {
            provider,
            responses: Vec::new(),
            error: Some(error),
        }
    }

    /// No transport error and no per-request error.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && self.responses.iter().all(JsonRpcResponse::is_ok)
    }
}

/// Sends the same batch to all registered providers.
pub struct BatchClient {
    registry: Arc<ProviderRegistry>,
    ids: IdAllocator,
}

impl BatchClient {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            ids: IdAllocator::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Issue `calls` as one batch to every provider, each bounded by `timeout`.
    ///
    /// Results come back in registry order, one per provider.
    pub async fn send(&self, calls: &[RpcCall], timeout: Duration) -> Vec<ProviderResult> {
        let requests = self.ids.assign(calls);
        let futures = self.registry.transports().map(|(id, transport)| {
            let requests = requests.clone();
            async move { send_one(id.clone(), transport.as_ref(), requests, timeout).await }
        });
        join_all(futures).await
    }

    /// Issue a distinct batch to each provider.
    ///
    /// Every registered provider appears in the output. A provider with no
    /// entry in `batches` yields a failed result carrying `missing`'s message,
    /// so the quorum resolver still counts it as a participant that did not
    /// answer.
    pub async fn send_to(
        &self,
        mut batches: HashMap<ProviderId, Vec<RpcCall>>,
        timeout: Duration,
        missing: &str,
    ) -> Vec<ProviderResult> {
        let planned: Vec<_> = self
            .registry
            .transports()
            .map(|(id, transport)| {
                let requests = batches.remove(id).map(|calls| self.ids.assign(&calls));
                (id, transport, requests)
            })
            .collect();
        for unknown in batches.keys() {
            tracing::warn!(provider = %unknown, "batch addressed to unregistered provider dropped");
        }

        let futures = planned.into_iter().map(|(id, transport, requests)| async move {
            match requests {
                Some(requests) => send_one(id.clone(), transport.as_ref(), requests, timeout).await,
                None => ProviderResult::failed(id.clone(), TransportError::Other(missing.to_string())),
            }
        });
        join_all(futures).await
    }
}

async fn send_one(
    provider: ProviderId,
    transport: &dyn RpcTransport,
    requests: Vec<JsonRpcRequest>,
    timeout: Duration,
) -> ProviderResult {
    if requests.is_empty() {
        return ProviderResult::ok(provider, Vec::new());
    }
    let expected: Vec<RpcId> = requests.iter().map(|r| r.id.clone()).collect();
    let outcome = match tokio::time::timeout(timeout, transport.send_batch(requests)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
    };

    match outcome.and_then(|responses| order_by_id(&expected, responses)) {
        Ok(responses) => {
            tracing::trace!(provider = %provider, count = responses.len(), "batch answered");
            ProviderResult::ok(provider, responses)
        }
        Err(e) => {
            tracing::debug!(provider = %provider, error = %e, "provider batch failed");
            ProviderResult::failed(provider, e)
        }
    }
}

/// Re-order a batch response to match the request order.
///
/// JSON-RPC 2.0 lets servers answer a batch in any order; downstream code
/// relies on positional matching, so anything other than exactly one response
/// per request id is rejected.
fn order_by_id(
    expected: &[RpcId],
    responses: Vec<JsonRpcResponse>,
) -> Result<Vec<JsonRpcResponse>, TransportError> {
    if responses.len() != expected.len() {
        return Err(TransportError::BatchMismatch(format!(
            "sent {} requests, received {} responses",
            expected.len(),
            responses.len()
        )));
    }
    let mut by_id: HashMap<RpcId, JsonRpcResponse> =
        responses.into_iter().map(|r| (r.id.clone(), r)).collect();
    expected
        .iter()
        .map(|id| {
            by_id
                .remove(id)
                .ok_or_else(|| TransportError::BatchMismatch(format!("no response for request id {id}")))
        })
        .collect()
}
