//! Scripted in-memory chain used as a provider transport in integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::{json, Value};

use chainquorum_core::provider::{ProviderEndpoint, ProviderRegistry};
use chainquorum_core::quorum::QuorumClient;
use chainquorum_core::request::{JsonRpcRequest, JsonRpcResponse};
use chainquorum_core::retry::{RetryConfig, RetryPolicy};
use chainquorum_core::{RpcTransport, TransportError};
use chainquorum_evm::fingerprint::signature_topic;
use chainquorum_evm::types::{parse_quantity, to_quantity, RawLog};
use chainquorum_evm::{marketplace_abi, ContractDescriptor, Dispatcher, EventSpec, ReceiptResolver};

pub const MARKET: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const BUYER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
pub const ARTIST: &str = "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC";
pub const PURCHASE_SIG: &str = "Purchase(address,address,uint256,string,uint256,uint256,uint256)";
pub const MINTED_SIG: &str = "EditionMinted(uint256,address,uint256,uint256)";

#[derive(Default)]
struct ChainState {
    head: u64,
    hang: bool,
    failing: HashSet<String>,
    logs: Vec<RawLog>,
    receipts: HashMap<String, Value>,
    filters: HashMap<String, Value>,
    next_filter: u64,
    uninstalled: Vec<String>,
    log_queries: Vec<(u64, u64)>,
}

/// One provider's view of the chain. Clones share state.
#[derive(Clone)]
pub struct MockChain {
    name: String,
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new(name: &str, head: u64) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(ChainState {
                head,
                ..Default::default()
            })),
        }
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Never answer (until the caller's timeout fires).
    pub fn hang(&self, hang: bool) {
        self.state.lock().unwrap().hang = hang;
    }

    /// Fail any batch containing `method` with an HTTP error.
    pub fn fail_method(&self, method: &str) {
        self.state.lock().unwrap().failing.insert(method.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn push_log(&self, log: RawLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn put_receipt(&self, hash: &str, receipt: Value) {
        self.state.lock().unwrap().receipts.insert(hash.to_string(), receipt);
    }

    pub fn installed_filters(&self) -> HashSet<String> {
        self.state.lock().unwrap().filters.keys().cloned().collect()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.state.lock().unwrap().uninstalled.clone()
    }

    /// `(fromBlock, toBlock)` of every `eth_getLogs` / `eth_newFilter` seen.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn endpoint(&self) -> ProviderEndpoint {
        ProviderEndpoint::new(self.name.as_str(), &format!("http://{}.invalid:8545", self.name)).unwrap()
    }

    pub fn transport(&self) -> Arc<dyn RpcTransport> {
        Arc::new(self.clone())
    }

    fn answer(&self, state: &mut ChainState, req: &JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id.clone();
        let param = req.params.first().cloned().unwrap_or(Value::Null);
        match req.method.as_str() {
            "eth_blockNumber" => JsonRpcResponse::success(id, json!(to_quantity(state.head))),
            "eth_getLogs" => {
                let logs = matching_logs(state, &param);
                JsonRpcResponse::success(id, serde_json::to_value(logs).unwrap())
            }
            "eth_newFilter" => {
                state.next_filter += 1;
                let handle = format!("0x{}{:04x}", hex_name(&self.name), state.next_filter);
                state.filters.insert(handle.clone(), param);
                JsonRpcResponse::success(id, json!(handle))
            }
            "eth_getFilterLogs" => {
                let handle = param.as_str().unwrap_or_default();
                match state.filters.get(handle).cloned() {
                    Some(filter) => {
                        let logs = matching_logs(state, &filter);
                        JsonRpcResponse::success(id, serde_json::to_value(logs).unwrap())
                    }
                    None => JsonRpcResponse::failure(id, -32000, "filter not found"),
                }
            }
            "eth_uninstallFilter" => {
                let handle = param.as_str().unwrap_or_default().to_string();
                let existed = state.filters.remove(&handle).is_some();
                state.uninstalled.push(handle);
                JsonRpcResponse::success(id, json!(existed))
            }
            "eth_getTransactionReceipt" => {
                let hash = param.as_str().unwrap_or_default();
                JsonRpcResponse::success(id, state.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            other => JsonRpcResponse::failure(id, -32601, format!("method {other} not found")),
        }
    }
}

fn hex_name(name: &str) -> String {
    name.bytes().map(|b| format!("{b:02x}")).collect()
}

fn matching_logs(state: &mut ChainState, filter: &Value) -> Vec<RawLog> {
    let from = filter["fromBlock"].as_str().and_then(parse_quantity).unwrap_or(0);
    let to = filter["toBlock"].as_str().and_then(parse_quantity).unwrap_or(u64::MAX);
    let address = filter["address"].as_str().unwrap_or_default().to_lowercase();
    state.log_queries.push((from, to));
    state
        .logs
        .iter()
        .filter(|l| l.address.to_lowercase() == address)
        .filter(|l| l.block_number_u64().is_some_and(|b| b >= from && b <= to))
        .cloned()
        .collect()
}

#[async_trait]
impl RpcTransport for MockChain {
    async fn send_batch(&self, reqs: Vec<JsonRpcRequest>) -> Result<Vec<JsonRpcResponse>, TransportError> {
        let hang = self.state.lock().unwrap().hang;
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let mut state = self.state.lock().unwrap();
        if reqs.iter().any(|r| state.failing.contains(&r.method)) {
            return Err(TransportError::Http("HTTP 503".into()));
        }
        // Servers may answer a batch in any order.
        let mut responses: Vec<_> = reqs.iter().map(|r| self.answer(&mut state, r)).collect();
        responses.reverse();
        Ok(responses)
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.name)
    }
}

pub fn client(chains: &[MockChain], timeout: Duration) -> Arc<QuorumClient> {
    let registry = ProviderRegistry::new(chains.iter().map(|c| (c.endpoint(), c.transport())).collect()).unwrap();
    Arc::new(QuorumClient::for_registry(Arc::new(registry), None, false, timeout))
}

pub fn market() -> ContractDescriptor {
    ContractDescriptor::new(
        MARKET,
        marketplace_abi().unwrap(),
        vec![EventSpec::new("Purchase"), EventSpec::new("EditionMinted")],
    )
    .unwrap()
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(["Purchase", "PurchaseEdition", "EditionMinted"])
}

pub fn receipts(client: Arc<QuorumClient>) -> Arc<ReceiptResolver> {
    let retry = RetryPolicy::new(RetryConfig {
        max_retries: 2,
        initial_backoff_ms: 5,
        max_backoff_ms: 20,
        multiplier: 2.0,
    });
    Arc::new(ReceiptResolver::new(client, retry))
}

pub fn tx_hash(n: u8) -> String {
    format!("0x{}", hex::encode([n; 32]))
}

fn word(v: DynSolValue) -> String {
    format!("0x{}", hex::encode(v.as_word().unwrap()))
}

/// A `Purchase` log from the marketplace contract.
pub fn purchase_log(block: u64, log_index: u64, release_id: u64) -> RawLog {
    let buyer: Address = BUYER.parse().unwrap();
    let artist: Address = ARTIST.parse().unwrap();
    let data = DynSolValue::Tuple(vec![
        DynSolValue::String("user-42".into()),
        DynSolValue::Uint(U256::from(1_000u64), 256),
        DynSolValue::Uint(U256::from(900u64), 256),
        DynSolValue::Uint(U256::from(100u64), 256),
    ])
    .abi_encode_params();
    RawLog {
        address: MARKET.to_lowercase(),
        topics: vec![
            signature_topic(PURCHASE_SIG),
            word(DynSolValue::Address(buyer)),
            word(DynSolValue::Address(artist)),
            word(DynSolValue::Uint(U256::from(release_id), 256)),
        ],
        data: format!("0x{}", hex::encode(data)),
        block_number: Some(to_quantity(block)),
        block_hash: Some(format!("0x{}", hex::encode([block as u8; 32]))),
        transaction_hash: Some(tx_hash(block as u8)),
        log_index: Some(to_quantity(log_index)),
        removed: false,
    }
}

/// An `EditionMinted` log from the marketplace contract.
pub fn minted_log(block: u64, log_index: u64, release_id: u64) -> RawLog {
    let artist: Address = ARTIST.parse().unwrap();
    let data = DynSolValue::Tuple(vec![
        DynSolValue::Uint(U256::from(11u64), 256),
        DynSolValue::Uint(U256::from(3u64), 256),
    ])
    .abi_encode_params();
    RawLog {
        address: MARKET.to_lowercase(),
        topics: vec![
            signature_topic(MINTED_SIG),
            word(DynSolValue::Uint(U256::from(release_id), 256)),
            word(DynSolValue::Address(artist)),
        ],
        data: format!("0x{}", hex::encode(data)),
        block_number: Some(to_quantity(block)),
        block_hash: Some(format!("0x{}", hex::encode([block as u8; 32]))),
        transaction_hash: Some(tx_hash(block as u8)),
        log_index: Some(to_quantity(log_index)),
        removed: false,
    }
}

pub fn receipt_json(hash: &str, block: u64) -> Value {
    json!({
        "transactionHash": hash,
        "blockHash": format!("0x{}", hex::encode([block as u8; 32])),
        "blockNumber": to_quantity(block),
        "from": BUYER.to_lowercase(),
        "to": MARKET.to_lowercase(),
        "contractAddress": null,
        "status": "0x1",
        "gasUsed": "0x5208",
        "logs": []
    })
}
