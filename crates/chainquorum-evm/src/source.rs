//! Log sources — how one tick's logs are fetched from the provider set.
//!
//! ```text
//! RangeLogSource   eth_getLogs × targets ──────────────▶ quorum ─▶ logs per target
//!
//! FilterLogSource  eth_uninstallFilter (previous tick, best effort)
//!                  eth_newFilter × targets  (every provider, own handles)
//!                  eth_getFilterLogs × own handles ────▶ quorum ─▶ logs per target
//! ```
//!
//! Both produce the same shape: one canonical `Vec<RawLog>` per target, in
//! target order.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainquorum_core::provider::ProviderId;
use chainquorum_core::quorum::QuorumClient;
use chainquorum_core::request::RpcCall;

use crate::contract::LogTarget;
use crate::poller::PollError;
use crate::types::{BlockRange, RawLog};

/// Which log source a service uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSourceKind {
    /// One `eth_getLogs` per target.
    #[default]
    Range,
    /// Per-provider `eth_newFilter` + `eth_getFilterLogs`.
    Filter,
}

impl LogSourceKind {
    pub fn build(self) -> Box<dyn LogSource> {
        match self {
            LogSourceKind::Range => Box::new(RangeLogSource),
            LogSourceKind::Filter => Box::new(FilterLogSource::new()),
        }
    }
}

/// Fetches quorum-verified logs for a block range.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// Canonical logs for each target, in target order.
    async fn fetch(
        &mut self,
        client: &QuorumClient,
        targets: &[LogTarget],
        range: BlockRange,
    ) -> Result<Vec<Vec<RawLog>>, PollError>;

    /// Release provider-side resources. Called once when the poller stops.
    async fn release(&mut self, _client: &QuorumClient) {}

    fn kind(&self) -> LogSourceKind;
}

/// Direct `eth_getLogs` range queries.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeLogSource;

#[async_trait]
impl LogSource for RangeLogSource {
    async fn fetch(
        &mut self,
        client: &QuorumClient,
        targets: &[LogTarget],
        range: BlockRange,
    ) -> Result<Vec<Vec<RawLog>>, PollError> {
        if targets.is_empty() {
            return Ok(vec![]);
        }
        let calls: Vec<RpcCall> = targets
            .iter()
            .map(|t| RpcCall::new("eth_getLogs", vec![t.filter_object(range)]))
            .collect();
        let decision = client.call(&calls).await?;
        tracing::debug!(
            provider = %decision.provider,
            agreeing = decision.agreeing,
            from = range.from,
            to = range.to,
            "logs resolved"
        );
        decision.into_results().into_iter().map(parse_logs).collect()
    }

    fn kind(&self) -> LogSourceKind {
        LogSourceKind::Range
    }
}

/// Provider-specific filter handles, recreated every tick.
///
/// The handle table maps each provider to the handles it issued for the
/// current tick, in target order. A handle is only ever sent back to the
/// provider that issued it.
#[derive(Debug, Default)]
pub struct FilterLogSource {
    handles: HashMap<ProviderId, Vec<String>>,
}

impl FilterLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles currently installed, per provider.
    pub fn handles(&self) -> &HashMap<ProviderId, Vec<String>> {
        &self.handles
    }

    async fn uninstall(&mut self, client: &QuorumClient) {
        if self.handles.is_empty() {
            return;
        }
        let batches: HashMap<ProviderId, Vec<RpcCall>> = self
            .handles
            .drain()
            .map(|(provider, handles)| {
                let calls = handles
                    .into_iter()
                    .map(|h| RpcCall::new("eth_uninstallFilter", vec![Value::String(h)]))
                    .collect();
                (provider, calls)
            })
            .collect();
        let results = client
            .batch()
            .send_to(batches, client.timeout(), "no filters to uninstall")
            .await;
        for r in results.iter().filter(|r| !r.is_usable()) {
            tracing::trace!(provider = %r.provider, "filter uninstall failed (ignored)");
        }
    }
}

#[async_trait]
impl LogSource for FilterLogSource {
    async fn fetch(
        &mut self,
        client: &QuorumClient,
        targets: &[LogTarget],
        range: BlockRange,
    ) -> Result<Vec<Vec<RawLog>>, PollError> {
        self.uninstall(client).await;
        if targets.is_empty() {
            return Ok(vec![]);
        }

        let installs: Vec<RpcCall> = targets
            .iter()
            .map(|t| RpcCall::new("eth_newFilter", vec![t.filter_object(range)]))
            .collect();
        for result in client.batch().send(&installs, client.timeout()).await {
            if !result.is_usable() {
                tracing::debug!(provider = %result.provider, "filter install failed");
                continue;
            }
            let handles: Option<Vec<String>> = result
                .responses
                .iter()
                .map(|r| r.result_or_null().as_str().map(str::to_string))
                .collect();
            match handles {
                Some(handles) => {
                    self.handles.insert(result.provider, handles);
                }
                None => tracing::debug!(provider = %result.provider, "non-string filter id"),
            }
        }

        let queries: HashMap<ProviderId, Vec<RpcCall>> = self
            .handles
            .iter()
            .map(|(provider, handles)| {
                let calls = handles
                    .iter()
                    .map(|h| RpcCall::new("eth_getFilterLogs", vec![Value::String(h.clone())]))
                    .collect();
                (provider.clone(), calls)
            })
            .collect();
        let results = client
            .batch()
            .send_to(queries, client.timeout(), "no filter installed on provider")
            .await;
        let decision = client.resolver().resolve(results)?;
        tracing::debug!(
            provider = %decision.provider,
            agreeing = decision.agreeing,
            from = range.from,
            to = range.to,
            "filter logs resolved"
        );
        decision.into_results().into_iter().map(parse_logs).collect()
    }

    async fn release(&mut self, client: &QuorumClient) {
        self.uninstall(client).await;
    }

    fn kind(&self) -> LogSourceKind {
        LogSourceKind::Filter
    }
}

fn parse_logs(value: Value) -> Result<Vec<RawLog>, PollError> {
    serde_json::from_value(value)
        .map_err(|e| PollError::MalformedResponse(format!("log list: {e}")))
}
