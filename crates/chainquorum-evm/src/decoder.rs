//! `EventDecoder` — raw logs to named, declaration-ordered events.
//!
//! Decoding is a pure function of the log and the contract ABIs supplied at
//! construction. A log from an unknown contract, or with a topic0 that the
//! contract's ABI does not define, is a configuration error: it means the
//! filters and the ABIs disagree, and the poller refuses to advance past it.

use std::collections::HashMap;

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_dyn_abi::Specifier;
use alloy_primitives::Address;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::contract::ContractDescriptor;
use crate::fingerprint::{parse_topic, signature_topic};
use crate::types::RawLog;
use crate::value::{checksum, normalize, NormalizedValue};

/// A decoded log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedEvent {
    /// Event name from the ABI (e.g. `"Purchase"`).
    pub name: String,
    /// Arguments in ABI declaration order.
    pub args: IndexMap<String, NormalizedValue>,
    /// Emitting contract, EIP-55 checksummed.
    pub address: String,
    pub transaction_hash: String,
    pub block_hash: Option<String>,
    pub block_number: u64,
    pub log_index: u64,
}

impl DecodedEvent {
    pub fn arg(&self, name: &str) -> Option<&NormalizedValue> {
        self.args.get(name)
    }

    /// `(block, logIndex)`, the chain-order sort key.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Errors raised while decoding a raw log.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("log emitted by unconfigured contract {address}")]
    UnknownContract { address: String },

    #[error("topic0 {topic0} is not an event of contract {address}")]
    UnknownTopic { address: String, topic0: String },

    #[error("event '{event}' expects {expected} topics, log has {found}")]
    TopicCount {
        event: String,
        expected: usize,
        found: usize,
    },

    #[error("malformed log: {0}")]
    MalformedLog(String),

    #[error("ABI decode of '{event}' failed: {reason}")]
    Abi { event: String, reason: String },
}

impl DecodeError {
    /// Unknown contract / unknown topic: filters and ABIs disagree.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownContract { .. } | Self::UnknownTopic { .. })
    }
}

#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    ty: DynSolType,
    indexed: bool,
}

#[derive(Debug, Clone)]
struct CompiledEvent {
    name: String,
    params: Vec<CompiledParam>,
    indexed_count: usize,
}

/// Decodes logs for a fixed set of contracts.
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    contracts: HashMap<Address, HashMap<[u8; 32], CompiledEvent>>,
}

impl EventDecoder {
    /// Compile every non-anonymous event in each contract's ABI.
    pub fn new(contracts: &[ContractDescriptor]) -> Result<Self, ConfigError> {
        let mut compiled = HashMap::new();
        for contract in contracts {
            let mut by_topic = HashMap::new();
            for event in contract.abi().events().filter(|e| !e.anonymous) {
                let params = event
                    .inputs
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let ty = p.resolve().map_err(|e| {
                            ConfigError::Abi(format!("event {}: parameter {i}: {e}", event.name))
                        })?;
                        let name = if p.name.is_empty() { i.to_string() } else { p.name.clone() };
                        Ok(CompiledParam {
                            name,
                            ty,
                            indexed: p.indexed,
                        })
                    })
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                let indexed_count = params.iter().filter(|p| p.indexed).count();
                let topic = parse_topic(&signature_topic(&event.signature()))
                    .ok_or_else(|| ConfigError::Abi(format!("event {}: bad signature", event.name)))?;
                by_topic.insert(
                    topic,
                    CompiledEvent {
                        name: event.name.clone(),
                        params,
                        indexed_count,
                    },
                );
            }
            compiled.insert(contract.address(), by_topic);
        }
        Ok(Self {
            contracts: compiled,
        })
    }

    /// Names of every event this decoder can produce.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.contracts
            .values()
            .flat_map(|events| events.values().map(|e| e.name.as_str()))
    }

    /// Decode one raw log.
    pub fn decode(&self, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
        let address: Address = log
            .address
            .parse()
            .map_err(|_| DecodeError::MalformedLog(format!("invalid address {}", log.address)))?;
        let events = self
            .contracts
            .get(&address)
            .ok_or_else(|| DecodeError::UnknownContract {
                address: checksum(&address),
            })?;

        let topic0_hex = log
            .topics
            .first()
            .ok_or_else(|| DecodeError::MalformedLog("log has no topics".into()))?;
        let topic0 = parse_topic(topic0_hex)
            .ok_or_else(|| DecodeError::MalformedLog(format!("invalid topic {topic0_hex}")))?;
        let event = events.get(&topic0).ok_or_else(|| DecodeError::UnknownTopic {
            address: checksum(&address),
            topic0: topic0_hex.to_lowercase(),
        })?;

        let block_number = log
            .block_number_u64()
            .ok_or_else(|| DecodeError::MalformedLog("missing or invalid blockNumber".into()))?;
        let log_index = log
            .log_index_u64()
            .ok_or_else(|| DecodeError::MalformedLog("missing or invalid logIndex".into()))?;
        let transaction_hash = log
            .transaction_hash
            .clone()
            .ok_or_else(|| DecodeError::MalformedLog("missing transactionHash".into()))?;

        if log.topics.len() != event.indexed_count + 1 {
            return Err(DecodeError::TopicCount {
                event: event.name.clone(),
                expected: event.indexed_count + 1,
                found: log.topics.len(),
            });
        }

        let mut indexed = log.topics[1..]
            .iter()
            .zip(event.params.iter().filter(|p| p.indexed))
            .map(|(topic, param)| decode_topic(event, param, topic))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();
        let mut data = decode_data(event, &log.data)?.into_iter();

        let mut args = IndexMap::with_capacity(event.params.len());
        for param in &event.params {
            let value = if param.indexed { indexed.next() } else { data.next() };
            let value = value.ok_or_else(|| DecodeError::Abi {
                event: event.name.clone(),
                reason: format!("no value for '{}'", param.name),
            })?;
            args.insert(param.name.clone(), value);
        }

        Ok(DecodedEvent {
            name: event.name.clone(),
            args,
            address: checksum(&address),
            transaction_hash,
            block_hash: log.block_hash.clone(),
            block_number,
            log_index,
        })
    }
}

/// Decode a single indexed topic (always 32 bytes).
///
/// Value types are stored ABI-encoded and are recovered. Reference types
/// (string, bytes, arrays, tuples) are stored as the keccak256 of their
/// encoding; the original value is unrecoverable, so the raw hash is returned.
fn decode_topic(
    event: &CompiledEvent,
    param: &CompiledParam,
    topic: &str,
) -> Result<NormalizedValue, DecodeError> {
    let word = parse_topic(topic)
        .ok_or_else(|| DecodeError::MalformedLog(format!("invalid topic {topic}")))?;
    match &param.ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => Ok(NormalizedValue::Bytes(word.to_vec())),
        ty => ty
            .abi_decode(&word)
            .map(normalize)
            .map_err(|e| DecodeError::Abi {
                event: event.name.clone(),
                reason: format!("topic '{}': {e}", param.name),
            }),
    }
}

/// Decode the data payload (non-indexed params) as one parameter sequence.
fn decode_data(event: &CompiledEvent, data_hex: &str) -> Result<Vec<NormalizedValue>, DecodeError> {
    let types: Vec<DynSolType> = event
        .params
        .iter()
        .filter(|p| !p.indexed)
        .map(|p| p.ty.clone())
        .collect();
    if types.is_empty() {
        return Ok(vec![]);
    }
    let digits = data_hex.strip_prefix("0x").unwrap_or(data_hex);
    let bytes = hex::decode(digits)
        .map_err(|e| DecodeError::MalformedLog(format!("invalid data hex: {e}")))?;

    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(&bytes)
        .map_err(|e| DecodeError::Abi {
            event: event.name.clone(),
            reason: e.to_string(),
        })?;
    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    Ok(values.into_iter().map(normalize).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::EventSpec;
    use crate::events::marketplace_abi;
    use alloy_primitives::U256;

    const MARKET: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

    fn decoder() -> EventDecoder {
        let c = ContractDescriptor::new(
            MARKET,
            marketplace_abi().unwrap(),
            vec![EventSpec::new("Purchase"), EventSpec::new("EditionMinted")],
        )
        .unwrap();
        EventDecoder::new(&[c]).unwrap()
    }

    fn word_hex(v: DynSolValue) -> String {
        format!("0x{}", hex::encode(v.as_word().unwrap()))
    }

    fn minted_log() -> RawLog {
        let artist: Address = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".parse().unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(11u64), 256),
            DynSolValue::Uint(U256::from(4u64), 256),
        ])
        .abi_encode_params();
        RawLog {
            address: MARKET.to_lowercase(),
            topics: vec![
                signature_topic("EditionMinted(uint256,address,uint256,uint256)"),
                word_hex(DynSolValue::Uint(U256::from(9u64), 256)),
                word_hex(DynSolValue::Address(artist)),
            ],
            data: format!("0x{}", hex::encode(data)),
            block_number: Some("0x67".into()),
            block_hash: Some(format!("0x{}", "bb".repeat(32))),
            transaction_hash: Some(format!("0x{}", "aa".repeat(32))),
            log_index: Some("0x2".into()),
            removed: false,
        }
    }

    #[test]
    fn decodes_indexed_and_data_in_declaration_order() {
        let ev = decoder().decode(&minted_log()).unwrap();
        assert_eq!(ev.name, "EditionMinted");
        let names: Vec<_> = ev.args.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["releaseId", "artist", "objectId", "editionId"]);
        assert_eq!(ev.arg("releaseId"), Some(&NormalizedValue::Uint(9)));
        assert_eq!(ev.arg("objectId"), Some(&NormalizedValue::Uint(11)));
        assert_eq!(ev.position(), (103, 2));
        assert_eq!(ev.address, MARKET);
    }

    #[test]
    fn decoding_is_deterministic() {
        let d = decoder();
        let log = minted_log();
        assert_eq!(d.decode(&log).unwrap(), d.decode(&log).unwrap());
    }

    #[test]
    fn unknown_topic_is_configuration_error() {
        let mut log = minted_log();
        log.topics[0] = signature_topic("Transfer(address,address,uint256)");
        let err = decoder().decode(&log).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownTopic { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn unknown_contract_is_configuration_error() {
        let mut log = minted_log();
        log.address = "0x0000000000000000000000000000000000000001".into();
        assert!(decoder().decode(&log).unwrap_err().is_configuration());
    }

    #[test]
    fn wrong_topic_count_and_truncated_data() {
        let mut log = minted_log();
        log.topics.pop();
        assert!(matches!(decoder().decode(&log), Err(DecodeError::TopicCount { .. })));

        let mut log = minted_log();
        log.data = "0x00".into();
        assert!(matches!(decoder().decode(&log), Err(DecodeError::Abi { .. })));
    }

    #[test]
    fn indexed_string_is_reported_as_hash() {
        let abi = serde_json::from_value(serde_json::json!([{
            "type": "event", "name": "Tagged", "anonymous": false,
            "inputs": [{"name": "tag", "type": "string", "indexed": true}]
        }]))
        .unwrap();
        let c = ContractDescriptor::new(MARKET, abi, vec![EventSpec::new("Tagged")]).unwrap();
        let d = EventDecoder::new(&[c]).unwrap();
        let mut log = minted_log();
        let hash = format!("0x{}", "cd".repeat(32));
        log.topics = vec![signature_topic("Tagged(string)"), hash];
        log.data = "0x".into();
        let ev = d.decode(&log).unwrap();
        assert_eq!(ev.arg("tag"), Some(&NormalizedValue::Bytes(vec![0xcd; 32])));
    }
}
