//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! One `HttpRpcClient` per provider. Retries and timeouts are not handled
//! here: the batch client bounds every call and the quorum layer decides what
//! a failed provider means.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use chainquorum_core::error::TransportError;
use chainquorum_core::provider::{redact, ProviderEndpoint};
use chainquorum_core::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use chainquorum_core::transport::RpcTransport;

/// Configuration for `HttpRpcClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Hard ceiling on a single HTTP exchange, in milliseconds. The batch
    /// client applies its own (usually shorter) timeout on top.
    pub request_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// HTTP JSON-RPC transport for one provider.
pub struct HttpRpcClient {
    url: Url,
    http: reqwest::Client,
}

impl HttpRpcClient {
    /// Create a client for a validated provider endpoint.
    pub fn new(endpoint: &ProviderEndpoint, config: HttpClientConfig) -> Result<Self, TransportError> {
        Self::from_url(endpoint.url().clone(), config)
    }

    /// Create a client for a raw URL.
    pub fn from_url(url: Url, config: HttpClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl RpcTransport for HttpRpcClient {
    /// True HTTP batch: all requests as one JSON array in one POST.
    async fn send_batch(
        &self,
        reqs: Vec<JsonRpcRequest>,
    ) -> Result<Vec<JsonRpcResponse>, TransportError> {
        if reqs.is_empty() {
            return Ok(vec![]);
        }

        let resp = self
            .http
            .post(self.url.clone())
            .json(&reqs)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.without_url().to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            tracing::debug!(endpoint = %self.describe(), status, "non-success HTTP status");
            return Err(TransportError::Http(format!("HTTP {status}")));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.without_url().to_string()))?;
        parse_batch_body(body)
    }

    fn describe(&self) -> String {
        redact(&self.url)
    }
}

/// A batch answer is a JSON array. Some nodes reject the whole batch with a
/// single error object instead; that surfaces as `TransportError::Rpc`.
fn parse_batch_body(body: Value) -> Result<Vec<JsonRpcResponse>, TransportError> {
    if body.is_array() {
        return Ok(serde_json::from_value(body)?);
    }
    match body {
        Value::Object(mut obj) => match obj.remove("error") {
            Some(err) => Err(TransportError::Rpc(serde_json::from_value::<JsonRpcError>(err)?)),
            None => Err(TransportError::BatchMismatch(
                "expected a JSON array for a batch request".into(),
            )),
        },
        _ => Err(TransportError::BatchMismatch(
            "expected a JSON array for a batch request".into(),
        )),
    }
}
