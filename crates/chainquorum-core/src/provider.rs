//! Provider identities, endpoints and the immutable provider registry.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{RegistryError, TransportError};
use crate::transport::RpcTransport;

/// Opaque provider identity (e.g. `"alchemy"`, `"p1"`).
///
/// Identities are what appear in logs and diagnostics; the URL (which often
/// embeds an API key) never does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProviderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A configured provider: identity + connection URL. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    id: ProviderId,
    url: Url,
}

impl ProviderEndpoint {
    /// Parse and validate an endpoint. Only `http`/`https` URLs are accepted.
    pub fn new(id: impl Into<ProviderId>, url: &str) -> Result<Self, RegistryError> {
        let id = id.into();
        let parsed = Url::parse(url).map_err(|e| RegistryError::InvalidUrl {
            provider: id.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidUrl {
                provider: id,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(Self { id, url: parsed })
    }

    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `scheme://host[:port]`, safe to log.
    pub fn redacted(&self) -> String {
        redact(&self.url)
    }
}

impl fmt::Debug for ProviderEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEndpoint")
            .field("id", &self.id)
            .field("url", &self.redacted())
            .finish()
    }
}

/// Strip path, query and credentials from a URL.
pub fn redact(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}://{host}:{port}", url.scheme()),
        (Some(host), None) => format!("{}://{host}", url.scheme()),
        _ => format!("{}://<redacted>", url.scheme()),
    }
}

struct ProviderSlot {
    endpoint: ProviderEndpoint,
    transport: Arc<dyn RpcTransport>,
}

/// The set of providers a service talks to.
///
/// Built once at construction and read-only afterwards, so it is shared
/// freely (`Arc<ProviderRegistry>`) between the poller and receipt lookups.
pub struct ProviderRegistry {
    slots: Vec<ProviderSlot>,
}

impl ProviderRegistry {
    /// Build a registry from already-connected transports.
    pub fn new(
        providers: Vec<(ProviderEndpoint, Arc<dyn RpcTransport>)>,
    ) -> Result<Self, RegistryError> {
        if providers.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut seen = HashSet::new();
        for (endpoint, _) in &providers {
            if !seen.insert(endpoint.id().clone()) {
                return Err(RegistryError::DuplicateProvider(endpoint.id().clone()));
            }
        }
        let slots = providers
            .into_iter()
            .map(|(endpoint, transport)| ProviderSlot { endpoint, transport })
            .collect();
        Ok(Self { slots })
    }

    /// Build a registry by connecting each endpoint with `connect`.
    pub fn connect<F>(endpoints: Vec<ProviderEndpoint>, mut connect: F) -> Result<Self, RegistryError>
    where
        F: FnMut(&ProviderEndpoint) -> Result<Arc<dyn RpcTransport>, TransportError>,
    {
        let mut providers = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let transport = connect(&endpoint).map_err(|e| RegistryError::Transport {
                provider: endpoint.id().clone(),
                reason: e.to_string(),
            })?;
            providers.push((endpoint, transport));
        }
        Self::new(providers)
    }

    /// Number of providers in the registry.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the registry has no providers.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Default quorum: `ceil(n / 2)`, never below 1.
    pub fn majority(&self) -> usize {
        majority_of(self.slots.len())
    }

    /// Provider identities in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &ProviderId> {
        self.slots.iter().map(|s| s.endpoint.id())
    }

    /// Endpoints in registration order.
    pub fn endpoints(&self) -> impl Iterator<Item = &ProviderEndpoint> {
        self.slots.iter().map(|s| &s.endpoint)
    }

    pub(crate) fn transports(&self) -> impl Iterator<Item = (&ProviderId, &Arc<dyn RpcTransport>)> {
        self.slots.iter().map(|s| (s.endpoint.id(), &s.transport))
    }
}

/// `ceil(n / 2)`, minimum 1.
pub fn majority_of(n: usize) -> usize {
    n.div_ceil(2).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{JsonRpcRequest, JsonRpcResponse};
    use async_trait::async_trait;

    struct Null;

    #[async_trait]
    impl RpcTransport for Null {
        async fn send_batch(
            &self,
            _reqs: Vec<JsonRpcRequest>,
        ) -> Result<Vec<JsonRpcResponse>, TransportError> {
            Ok(vec![])
        }
        fn describe(&self) -> String {
            "null".into()
        }
    }

    fn endpoint(id: &str) -> ProviderEndpoint {
        ProviderEndpoint::new(id, "https://rpc.example.com/v2/SECRET_KEY").unwrap()
    }

    #[test]
    fn majority_rounds_up() {
        assert_eq!(majority_of(0), 1);
        assert_eq!(majority_of(1), 1);
        assert_eq!(majority_of(2), 1);
        assert_eq!(majority_of(3), 2);
        assert_eq!(majority_of(4), 2);
        assert_eq!(majority_of(5), 3);
    }

    #[test]
    fn redaction_hides_key() {
        let ep = endpoint("alchemy");
        assert_eq!(ep.redacted(), "https://rpc.example.com");
        assert!(!format!("{ep:?}").contains("SECRET_KEY"));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = ProviderEndpoint::new("ws", "wss://rpc.example.com").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let null: Arc<dyn RpcTransport> = Arc::new(Null);
        let dup = ProviderRegistry::new(vec![
            (endpoint("a"), null.clone()),
            (endpoint("a"), null.clone()),
        ]);
        assert!(matches!(dup, Err(RegistryError::DuplicateProvider(_))));
        assert!(matches!(ProviderRegistry::new(vec![]), Err(RegistryError::Empty)));
    }

    #[test]
    fn registry_keeps_order() {
        let null: Arc<dyn RpcTransport> = Arc::new(Null);
        let reg = ProviderRegistry::new(vec![
            (endpoint("p1"), null.clone()),
            (endpoint("p2"), null.clone()),
            (endpoint("p3"), null),
        ])
        .unwrap();
        let ids: Vec<_> = reg.ids().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);
        assert_eq!(reg.majority(), 2);
    }
}
