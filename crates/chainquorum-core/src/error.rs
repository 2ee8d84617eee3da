//! Transport, registry and quorum error types.

use thiserror::Error;

use crate::provider::ProviderId;
use crate::request::JsonRpcError;

/// Errors that can occur while talking to a single provider.
///
/// These never escape the batch client: they are captured inside the
/// provider's `ProviderResult` and weighed by the quorum resolver.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, bad status, malformed body).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The batch response did not answer exactly the requests that were sent.
    #[error("Batch mismatch: {0}")]
    BatchMismatch(String),

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// An unexpected error.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient (network-level).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout { .. })
    }
}

/// Errors raised while building a `ProviderRegistry`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("at least one provider is required")]
    Empty,

    #[error("duplicate provider identity '{0}'")]
    DuplicateProvider(ProviderId),

    #[error("invalid URL for provider '{provider}': {reason}")]
    InvalidUrl { provider: ProviderId, reason: String },

    #[error("failed to build transport for provider '{provider}': {reason}")]
    Transport { provider: ProviderId, reason: String },
}

/// Errors raised by the quorum resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QuorumError {
    /// No group of `required` providers returned identical payloads.
    #[error(
        "quorum not reached: needed {required} matching responses, best group had {agreeing} \
         ({usable} usable of {total} providers)"
    )]
    NotReached {
        required: usize,
        agreeing: usize,
        usable: usize,
        total: usize,
    },

    /// The resolver was handed no provider results at all.
    #[error("no provider results to resolve")]
    NoResults,
}

impl QuorumError {
    /// Quorum failures are transient by nature: the same request may succeed
    /// once providers catch up with each other.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotReached { .. })
    }
}
