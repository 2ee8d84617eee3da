//! Contract descriptors and the log targets derived from them.
//!
//! A `ContractDescriptor` is address + ABI + the events of interest, each with
//! optional indexed-argument filters. Every (contract, event) pair becomes one
//! `LogTarget`: the `{address, topics}` half of an `eth_getLogs` /
//! `eth_newFilter` filter object.

use std::collections::BTreeMap;

use alloy_dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ConfigError;
use crate::fingerprint::{keccak256, signature_topic, topic_hex};
use crate::types::{to_quantity, BlockRange};
use crate::value::checksum;

/// One event of interest on a contract.
///
/// `filters` maps an indexed argument name to a value, or to an array of
/// values that are OR-ed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub name: String,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
}

impl EventSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: BTreeMap::new(),
        }
    }

    /// Add filter values for an indexed argument. An array adds each of its
    /// elements; repeated calls for the same argument accumulate (OR semantics).
    pub fn filter(mut self, arg: impl Into<String>, value: impl Into<Value>) -> Self {
        let added = match value.into() {
            Value::Array(values) => values,
            single => vec![single],
        };
        let slot = self.filters.entry(arg.into()).or_insert(Value::Array(vec![]));
        match slot {
            Value::Array(values) => values.extend(added),
            single => {
                let mut values = vec![single.take()];
                values.extend(added);
                *single = Value::Array(values);
            }
        }
        self
    }
}

/// Address + ABI + events of interest. Immutable once built.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    address: Address,
    abi: JsonAbi,
    events: Vec<EventSpec>,
    targets: Vec<LogTarget>,
}

impl ContractDescriptor {
    /// Validate and build a descriptor.
    ///
    /// Fails when the address is malformed, an event is missing from the ABI,
    /// overloaded or anonymous, or a filter names a non-indexed argument or
    /// carries a value that cannot be encoded as a topic.
    pub fn new(address: &str, abi: JsonAbi, events: Vec<EventSpec>) -> Result<Self, ConfigError> {
        let address: Address = address.parse().map_err(|e| ConfigError::InvalidAddress {
            address: address.to_string(),
            reason: format!("{e}"),
        })?;
        if events.is_empty() {
            return Err(ConfigError::NoEvents {
                contract: checksum(&address),
            });
        }
        let mut targets = Vec::with_capacity(events.len());
        for spec in &events {
            let event = find_event(&abi, &address, &spec.name)?;
            targets.push(LogTarget::build(address, event, spec)?);
        }
        Ok(Self {
            address,
            abi,
            events,
            targets,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &JsonAbi {
        &self.abi
    }

    pub fn events(&self) -> &[EventSpec] {
        &self.events
    }

    /// One log target per configured event, in configuration order.
    pub fn targets(&self) -> &[LogTarget] {
        &self.targets
    }

    /// ABI definition of a configured event.
    pub fn event(&self, name: &str) -> Option<&Event> {
        if !self.events.iter().any(|e| e.name == name) {
            return None;
        }
        self.abi.event(name).and_then(|overloads| overloads.first())
    }
}

fn find_event<'a>(abi: &'a JsonAbi, address: &Address, name: &str) -> Result<&'a Event, ConfigError> {
    let overloads = abi.event(name).ok_or_else(|| ConfigError::UnknownEvent {
        contract: checksum(address),
        event: name.to_string(),
    })?;
    let event = match overloads.as_slice() {
        [single] => single,
        [] => {
            return Err(ConfigError::UnknownEvent {
                contract: checksum(address),
                event: name.to_string(),
            })
        }
        _ => {
            return Err(ConfigError::AmbiguousEvent {
                contract: checksum(address),
                event: name.to_string(),
            })
        }
    };
    if event.anonymous {
        return Err(ConfigError::AnonymousEvent {
            event: name.to_string(),
        });
    }
    Ok(event)
}

/// The `{address, topics}` part of a log filter for one (contract, event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub address: Address,
    pub event: String,
    /// `topics[0]` is always the event signature hash; later positions are
    /// `None` (wildcard) or a non-empty OR-list of 32-byte topics.
    pub topics: Vec<Option<Vec<String>>>,
}

impl LogTarget {
    fn build(address: Address, event: &Event, spec: &EventSpec) -> Result<Self, ConfigError> {
        let indexed: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
        let mut topics: Vec<Option<Vec<String>>> = vec![Some(vec![signature_topic(&event.signature())])];
        topics.resize(indexed.len() + 1, None);

        for (arg, raw) in &spec.filters {
            let invalid = |reason: String| ConfigError::InvalidFilter {
                event: spec.name.clone(),
                arg: arg.clone(),
                reason,
            };
            let position = indexed
                .iter()
                .position(|p| &p.name == arg)
                .ok_or_else(|| invalid("not an indexed argument of this event".into()))?;
            let ty = indexed[position]
                .resolve()
                .map_err(|e| invalid(format!("unresolvable type: {e}")))?;
            let values: Vec<&Value> = match raw {
                Value::Array(items) => items.iter().collect(),
                single => vec![single],
            };
            if values.is_empty() {
                return Err(invalid("empty value list".into()));
            }
            let encoded = values
                .into_iter()
                .map(|v| encode_topic_value(&ty, v).map_err(&invalid))
                .collect::<Result<Vec<_>, _>>()?;
            topics[position + 1] = Some(encoded);
        }

        while matches!(topics.last(), Some(None)) {
            topics.pop();
        }
        Ok(Self {
            address,
            event: spec.name.clone(),
            topics,
        })
    }

    /// Signature hash of the target event.
    pub fn topic0(&self) -> &str {
        self.topics
            .first()
            .and_then(|t| t.as_ref())
            .and_then(|t| t.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// JSON-RPC `topics` array: `null` wildcards, single strings, OR-arrays.
    pub fn topics_json(&self) -> Value {
        Value::Array(
            self.topics
                .iter()
                .map(|slot| match slot {
                    None => Value::Null,
                    Some(values) if values.len() == 1 => Value::String(values[0].clone()),
                    Some(values) => json!(values),
                })
                .collect(),
        )
    }

    /// Full filter object for `eth_getLogs` / `eth_newFilter`.
    pub fn filter_object(&self, range: BlockRange) -> Value {
        json!({
            "fromBlock": to_quantity(range.from),
            "toBlock": to_quantity(range.to),
            "address": format!("{:#x}", self.address),
            "topics": self.topics_json(),
        })
    }
}

/// Encode one configured filter value as a 32-byte topic.
///
/// Value types are ABI-encoded into one word; `string` and `bytes` are
/// keccak-hashed the way the EVM stores them in indexed positions.
fn encode_topic_value(ty: &DynSolType, value: &Value) -> Result<String, String> {
    let text = || {
        value
            .as_str()
            .ok_or_else(|| format!("expected a string for {}, got {value}", ty.sol_type_name()))
    };
    let word: [u8; 32] = match ty {
        DynSolType::String => keccak256(text()?.as_bytes()),
        DynSolType::Bytes => keccak256(&decode_hex(text()?)?),
        DynSolType::Address => {
            let addr: Address = text()?.parse().map_err(|e| format!("invalid address: {e}"))?;
            to_word(DynSolValue::Address(addr))?
        }
        DynSolType::Bool => {
            let b = value.as_bool().ok_or_else(|| format!("expected a bool, got {value}"))?;
            to_word(DynSolValue::Bool(b))?
        }
        DynSolType::Uint(bits) => {
            let u = match value {
                Value::Number(n) => n
                    .as_u64()
                    .map(U256::from)
                    .ok_or_else(|| format!("expected an unsigned integer, got {n}"))?,
                _ => text()?.parse::<U256>().map_err(|e| format!("invalid uint: {e}"))?,
            };
            to_word(DynSolValue::Uint(u, *bits))?
        }
        DynSolType::Int(bits) => {
            let s = match value {
                Value::Number(n) => n.to_string(),
                _ => text()?.to_string(),
            };
            let i = s.parse::<I256>().map_err(|e| format!("invalid int: {e}"))?;
            to_word(DynSolValue::Int(i, *bits))?
        }
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex(text()?)?;
            if bytes.len() != *size {
                return Err(format!("expected {size} bytes, got {}", bytes.len()));
            }
            to_word(DynSolValue::FixedBytes(B256::right_padding_from(&bytes), *size))?
        }
        other => {
            return Err(format!(
                "filtering on indexed {} values is not supported",
                other.sol_type_name()
            ))
        }
    };
    Ok(topic_hex(&word))
}

fn to_word(value: DynSolValue) -> Result<[u8; 32], String> {
    value
        .as_word()
        .map(|w| w.0)
        .ok_or_else(|| "value does not fit in one word".to_string())
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| format!("invalid hex: {e}"))
}
