//! `EventService` — the consumer-facing façade.
//!
//! # Quick Start
//! ```rust,no_run
//! use chainquorum_evm::{EventServiceBuilder, ContractDescriptor, EventSpec, marketplace_abi};
//! use chainquorum_evm::dispatcher::DispatchedEvent;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let market = ContractDescriptor::new(
//!     "0x5FbDB2315678afecb367f032d93F642f64180aa3",
//!     marketplace_abi()?,
//!     vec![EventSpec::new("Purchase")],
//! )?;
//! let service = EventServiceBuilder::new()
//!     .provider("alchemy", "https://eth-mainnet.example.com/v2/KEY")
//!     .provider("infura", "https://mainnet.example.io/v3/KEY")
//!     .provider("ankr", "https://rpc.example.org/eth")
//!     .contract(market)
//!     .build()?;
//!
//! service.on("Purchase", |ev: DispatchedEvent| async move {
//!     let receipt = ev.receipt.get_with_retry().await?;
//!     println!("sale in block {} (status {:?})", ev.block_number, receipt.succeeded());
//!     anyhow::Ok(())
//! })?;
//! service.start()?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use chainquorum_core::provider::{ProviderEndpoint, ProviderRegistry};
use chainquorum_core::quorum::QuorumClient;
use chainquorum_core::retry::{RetryConfig, RetryPolicy};
use chainquorum_core::transport::RpcTransport;
use chainquorum_http::{HttpClientConfig, HttpRpcClient};

use crate::config::{ConfigError, ServiceConfig};
use crate::contract::ContractDescriptor;
use crate::cursor::BlockCursor;
use crate::dispatcher::{DispatchError, Dispatcher, EventHandler, SubscriptionId};
use crate::poller::{Poller, PollerConfig, PollerEvent};
use crate::receipt::{Receipt, ReceiptError, ReceiptResolver};
use crate::source::LogSourceKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service already started")]
    AlreadyStarted,

    #[error("service stopped")]
    Stopped,
}

enum ProviderSpec {
    Url { name: String, url: String },
    Transport(ProviderEndpoint, Arc<dyn RpcTransport>),
}

/// Programmatic construction, with the same options as [`ServiceConfig`].
pub struct EventServiceBuilder {
    providers: Vec<ProviderSpec>,
    contracts: Vec<ContractDescriptor>,
    poll_interval: Duration,
    request_timeout: Duration,
    quorum: Option<usize>,
    lenient_quorum: bool,
    log_source: LogSourceKind,
    backoff: RetryConfig,
    alert_after: u32,
    receipt_retry: RetryConfig,
    fail_fast_on_decode_error: bool,
    http: HttpClientConfig,
    start_cursor: Option<u64>,
}

impl Default for EventServiceBuilder {
    fn default() -> Self {
        let poller = PollerConfig::default();
        Self {
            providers: vec![],
            contracts: vec![],
            poll_interval: poller.interval,
            request_timeout: Duration::from_secs(5),
            quorum: None,
            lenient_quorum: false,
            log_source: LogSourceKind::Range,
            backoff: poller.backoff.config,
            alert_after: poller.alert_after,
            receipt_retry: RetryConfig::default(),
            fail_fast_on_decode_error: false,
            http: HttpClientConfig::default(),
            start_cursor: None,
        }
    }
}

impl EventServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pre-filled from a loaded config. Relative ABI paths resolve
    /// against `base_dir`.
    pub fn from_config(config: &ServiceConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::new()
            .poll_interval(Duration::from_millis(config.poll_interval_ms))
            .request_timeout(Duration::from_millis(config.request_timeout_ms))
            .lenient_quorum(config.lenient_quorum)
            .log_source(config.log_source)
            .backoff(config.backoff.clone())
            .alert_after(config.alert_after)
            .receipt_retry(config.receipt_retry.clone())
            .fail_fast_on_decode_error(config.fail_fast_on_decode_error)
            .http(config.http.clone());
        builder.quorum = config.quorum;
        for p in &config.providers {
            builder = builder.provider(&p.name, &p.url);
        }
        for c in config.contract_descriptors(base_dir)? {
            builder = builder.contract(c);
        }
        Ok(builder)
    }

    /// An HTTP provider.
    pub fn provider(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.providers.push(ProviderSpec::Url {
            name: name.into(),
            url: url.into(),
        });
        self
    }

    /// A provider backed by a caller-supplied transport.
    pub fn transport(mut self, endpoint: ProviderEndpoint, transport: Arc<dyn RpcTransport>) -> Self {
        self.providers.push(ProviderSpec::Transport(endpoint, transport));
        self
    }

    pub fn contract(mut self, contract: ContractDescriptor) -> Self {
        self.contracts.push(contract);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the default majority quorum.
    pub fn quorum(mut self, quorum: usize) -> Self {
        self.quorum = Some(quorum);
        self
    }

    pub fn lenient_quorum(mut self, lenient: bool) -> Self {
        self.lenient_quorum = lenient;
        self
    }

    pub fn log_source(mut self, kind: LogSourceKind) -> Self {
        self.log_source = kind;
        self
    }

    pub fn backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn alert_after(mut self, failures: u32) -> Self {
        self.alert_after = failures;
        self
    }

    pub fn receipt_retry(mut self, retry: RetryConfig) -> Self {
        self.receipt_retry = retry;
        self
    }

    pub fn fail_fast_on_decode_error(mut self, enabled: bool) -> Self {
        self.fail_fast_on_decode_error = enabled;
        self
    }

    pub fn http(mut self, http: HttpClientConfig) -> Self {
        self.http = http;
        self
    }

    /// Resume after `block` instead of bootstrapping at the current head.
    pub fn start_after(mut self, block: u64) -> Self {
        self.start_cursor = Some(block);
        self
    }

    pub fn build(self) -> Result<EventService, ConfigError> {
        if self.contracts.is_empty() {
            return Err(ConfigError::Invalid("at least one contract is required".into()));
        }
        if self.request_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("intervals and timeouts must be > 0".into()));
        }
        let mut providers = Vec::with_capacity(self.providers.len());
        for spec in self.providers {
            providers.push(match spec {
                ProviderSpec::Url { name, url } => {
                    let endpoint = ProviderEndpoint::new(name, &url)?;
                    let client = HttpRpcClient::new(&endpoint, self.http.clone()).map_err(|e| {
                        chainquorum_core::RegistryError::Transport {
                            provider: endpoint.id().clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    (endpoint, Arc::new(client) as Arc<dyn RpcTransport>)
                }
                ProviderSpec::Transport(endpoint, transport) => (endpoint, transport),
            });
        }
        let registry = Arc::new(ProviderRegistry::new(providers)?);
        if let Some(q) = self.quorum {
            if q == 0 || q > registry.len() {
                return Err(ConfigError::Invalid(format!(
                    "quorum must be between 1 and {}, got {q}",
                    registry.len()
                )));
            }
        }
        for endpoint in registry.endpoints() {
            tracing::info!(provider = %endpoint.id(), endpoint = %endpoint.redacted(), "provider registered");
        }

        let client = Arc::new(QuorumClient::for_registry(
            registry,
            self.quorum,
            self.lenient_quorum,
            self.request_timeout,
        ));
        let receipts = Arc::new(ReceiptResolver::new(
            client.clone(),
            RetryPolicy::new(self.receipt_retry),
        ));
        let dispatcher = Dispatcher::new(
            self.contracts
                .iter()
                .flat_map(|c| c.events().iter().map(|e| e.name.clone())),
        );
        let poller_config = PollerConfig {
            interval: self.poll_interval,
            backoff: RetryPolicy::new(self.backoff),
            alert_after: self.alert_after.max(1),
            fail_fast_on_decode_error: self.fail_fast_on_decode_error,
        };
        let mut poller = Poller::new(
            client.clone(),
            &self.contracts,
            dispatcher.clone(),
            receipts.clone(),
            poller_config,
        )?
        .with_source(self.log_source.build());
        if let Some(block) = self.start_cursor {
            poller = poller.with_cursor(BlockCursor::at(block));
        }
        tracing::info!(
            quorum = client.resolver().quorum(),
            lenient = client.resolver().is_lenient(),
            source = ?self.log_source,
            "event service built"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(EventService {
            client,
            dispatcher,
            receipts,
            diagnostics: poller.diagnostics(),
            shutdown,
            poller: Mutex::new(Some(poller)),
            task: Mutex::new(None),
        })
    }
}

/// A running (or ready-to-run) ingestion pipeline.
pub struct EventService {
    client: Arc<QuorumClient>,
    dispatcher: Dispatcher,
    receipts: Arc<ReceiptResolver>,
    diagnostics: broadcast::Sender<PollerEvent>,
    shutdown: watch::Sender<bool>,
    poller: Mutex<Option<Poller>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventService {
    /// Register a handler for `event_name`.
    pub fn on<H: EventHandler>(
        &self,
        event_name: &str,
        handler: H,
    ) -> Result<SubscriptionId, DispatchError> {
        self.dispatcher.on(event_name, handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.dispatcher.off(id)
    }

    /// Spawn the polling task. The first tick runs immediately.
    pub fn start(&self) -> Result<(), ServiceError> {
        if *self.shutdown.borrow() {
            return Err(ServiceError::Stopped);
        }
        let poller = lock(&self.poller).take().ok_or(ServiceError::AlreadyStarted)?;
        let handle = tokio::spawn(poller.run(self.shutdown.subscribe()));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Cancel the timer, release all subscriptions and wait for the polling
    /// task to finish. Queued handler invocations are dropped and running ones
    /// are abandoned at their next suspension point, so no handler completes
    /// after this returns.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        self.dispatcher.close();
        lock(&self.poller).take();
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "poller task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Diagnostics stream (`Advanced`, `TickFailed`, `Alert`, ...).
    pub fn diagnostics(&self) -> broadcast::Receiver<PollerEvent> {
        self.diagnostics.subscribe()
    }

    pub fn receipts(&self) -> Arc<ReceiptResolver> {
        self.receipts.clone()
    }

    /// Quorum-verified receipt lookup, independent of the polling loop.
    pub async fn get_receipt(&self, hash: &str) -> Result<Receipt, ReceiptError> {
        self.receipts.get_receipt(hash).await
    }

    pub fn client(&self) -> &Arc<QuorumClient> {
        &self.client
    }
}

impl Drop for EventService {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.dispatcher.close();
    }
}
