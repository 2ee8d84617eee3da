//! chainquorum-core — multi-provider JSON-RPC with quorum agreement.
//!
//! # Overview
//!
//! Every read the rest of ChainQuorum performs goes through this crate:
//!
//! - [`ProviderRegistry`] — the immutable set of configured providers
//! - [`BatchClient`] — sends one JSON-RPC batch to every provider concurrently
//! - [`QuorumResolver`] — picks the answer at least `quorum` providers agree on
//! - [`QuorumClient`] — the two above plus a per-provider timeout
//! - [`RpcTransport`] — the async trait every provider connection implements
//! - [`retry`] — exponential backoff shared by callers that retry
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let registry = Arc::new(ProviderRegistry::connect(endpoints, |ep| {
//!     Ok(Arc::new(HttpRpcClient::new(ep, HttpClientConfig::default())?) as Arc<dyn RpcTransport>)
//! })?);
//! let client = QuorumClient::for_registry(registry, None, false, Duration::from_secs(5));
//! let head = client.call(&[RpcCall::block_number()]).await?;
//! ```

pub mod error;
pub mod fanout;
pub mod provider;
pub mod quorum;
pub mod request;
pub mod retry;
pub mod transport;

pub use error::{QuorumError, RegistryError, TransportError};
pub use fanout::{BatchClient, ProviderResult};
pub use provider::{majority_of, ProviderEndpoint, ProviderId, ProviderRegistry};
pub use quorum::{payload_hash, QuorumClient, QuorumDecision, QuorumResolver};
pub use request::{IdAllocator, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcCall, RpcId, RpcParam};
pub use retry::{RetryConfig, RetryPolicy};
pub use transport::RpcTransport;
