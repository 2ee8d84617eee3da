//! On-demand, quorum-verified transaction receipts.
//!
//! Lookups are independent of the polling loop: any number may run
//! concurrently, each as its own one-shot batch to every provider.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use chainquorum_core::error::QuorumError;
use chainquorum_core::quorum::QuorumClient;
use chainquorum_core::request::RpcCall;
use chainquorum_core::retry::RetryPolicy;

use crate::fingerprint::parse_topic;
use crate::types::{parse_quantity, RawLog};

/// Errors returned by receipt lookups.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReceiptError {
    #[error(transparent)]
    Quorum(#[from] QuorumError),

    /// Providers agree the receipt does not exist (yet).
    #[error("receipt for {hash} not found")]
    NotFound { hash: String },

    #[error("invalid transaction hash '{0}'")]
    InvalidHash(String),

    #[error("malformed receipt: {0}")]
    Malformed(String),
}

impl ReceiptError {
    /// Quorum failures and not-yet-mined receipts may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Quorum(e) => e.is_retryable(),
            Self::NotFound { .. } => true,
            Self::InvalidHash(_) | Self::Malformed(_) => false,
        }
    }
}

/// The fields of `eth_getTransactionReceipt` consumers act on, plus the raw
/// JSON for anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    pub block_hash: Option<String>,
    #[serde(deserialize_with = "quantity")]
    pub block_number: u64,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
    /// `0x1` success, `0x0` reverted; absent on pre-Byzantium receipts.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
    #[serde(skip)]
    pub raw: Value,
}

fn quantity<'de, D: serde::Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let s = String::deserialize(d)?;
    parse_quantity(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid quantity {s}")))
}

impl Receipt {
    pub fn from_json(raw: Value) -> Result<Self, ReceiptError> {
        let mut receipt: Receipt =
            serde_json::from_value(raw.clone()).map_err(|e| ReceiptError::Malformed(e.to_string()))?;
        receipt.raw = raw;
        Ok(receipt)
    }

    /// `Some(true)` when the transaction succeeded, `None` if unknown.
    pub fn succeeded(&self) -> Option<bool> {
        self.status.as_deref().and_then(parse_quantity).map(|s| s == 1)
    }
}

/// Resolves receipts through the same quorum client as the poller.
pub struct ReceiptResolver {
    client: Arc<QuorumClient>,
    retry: RetryPolicy,
}

impl ReceiptResolver {
    pub fn new(client: Arc<QuorumClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// One quorum-verified lookup.
    pub async fn get_receipt(&self, hash: &str) -> Result<Receipt, ReceiptError> {
        if parse_topic(hash).is_none() {
            return Err(ReceiptError::InvalidHash(hash.to_string()));
        }
        let call = RpcCall::new("eth_getTransactionReceipt", vec![Value::String(hash.to_string())]);
        let decision = self.client.call(std::slice::from_ref(&call)).await?;
        match decision.into_results().into_iter().next() {
            None | Some(Value::Null) => Err(ReceiptError::NotFound {
                hash: hash.to_string(),
            }),
            Some(raw) => Receipt::from_json(raw),
        }
    }

    /// `get_receipt`, retrying retryable failures with bounded backoff.
    pub async fn get_receipt_with_retry(&self, hash: &str) -> Result<Receipt, ReceiptError> {
        let mut attempt = 0u32;
        loop {
            match self.get_receipt(hash).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    match self.retry.next_delay(attempt) {
                        Some(delay) => {
                            tracing::debug!(
                                tx = hash,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying receipt lookup"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Receipt handle attached to every dispatched event.
#[derive(Clone)]
pub struct ReceiptAccessor {
    resolver: Arc<ReceiptResolver>,
    transaction_hash: String,
}

impl ReceiptAccessor {
    pub fn new(resolver: Arc<ReceiptResolver>, transaction_hash: impl Into<String>) -> Self {
        Self {
            resolver,
            transaction_hash: transaction_hash.into(),
        }
    }

    pub fn transaction_hash(&self) -> &str {
        &self.transaction_hash
    }

    /// Quorum-verified receipt of the event's transaction.
    pub async fn get(&self) -> Result<Receipt, ReceiptError> {
        self.resolver.get_receipt(&self.transaction_hash).await
    }

    /// Like [`get`](Self::get), with bounded retries.
    pub async fn get_with_retry(&self) -> Result<Receipt, ReceiptError> {
        self.resolver.get_receipt_with_retry(&self.transaction_hash).await
    }
}

impl std::fmt::Debug for ReceiptAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptAccessor")
            .field("transaction_hash", &self.transaction_hash)
            .finish()
    }
}
