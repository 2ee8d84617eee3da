//! chainquorum-http — HTTP JSON-RPC batch transport.
//!
//! Implements [`RpcTransport`](chainquorum_core::RpcTransport) over `reqwest`
//! and provides [`connect_registry`] for building a provider registry straight
//! from endpoint descriptions.

pub mod client;

use std::sync::Arc;

use chainquorum_core::error::RegistryError;
use chainquorum_core::provider::{ProviderEndpoint, ProviderRegistry};
use chainquorum_core::transport::RpcTransport;

pub use client::{HttpClientConfig, HttpRpcClient};

/// Build a registry with one `HttpRpcClient` per endpoint.
pub fn connect_registry(
    endpoints: Vec<ProviderEndpoint>,
    config: &HttpClientConfig,
) -> Result<ProviderRegistry, RegistryError> {
    ProviderRegistry::connect(endpoints, |endpoint| {
        let client = HttpRpcClient::new(endpoint, config.clone())?;
        Ok(Arc::new(client) as Arc<dyn RpcTransport>)
    })
}
