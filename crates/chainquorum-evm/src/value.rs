//! Decoded argument values.
//!
//! `DynSolValue` is mapped into a small, serializable value type so handlers
//! never deal with alloy's dynamic ABI representation directly.

use std::fmt;

use alloy_core::dyn_abi::DynSolValue;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// A decoded, normalized ABI value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum NormalizedValue {
    Uint(u128),
    /// Uints that do not fit in u128, as a decimal string.
    BigUint(String),
    Int(i128),
    /// Ints that do not fit in i128, as a decimal string.
    BigInt(String),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// EIP-55 checksummed, `0x`-prefixed.
    Address(String),
    Array(Vec<NormalizedValue>),
    Tuple(Vec<(String, NormalizedValue)>),
}

impl NormalizedValue {
    pub fn as_address(&self) -> Option<&str> {
        match self {
            NormalizedValue::Address(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u128(&self) -> Option<u128> {
        match self {
            NormalizedValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Any unsigned integer, small or big.
    pub fn as_u256(&self) -> Option<U256> {
        match self {
            NormalizedValue::Uint(v) => Some(U256::from(*v)),
            NormalizedValue::BigUint(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NormalizedValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            NormalizedValue::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            NormalizedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Uint(v) => write!(f, "{v}"),
            NormalizedValue::BigUint(v) => write!(f, "{v}"),
            NormalizedValue::Int(v) => write!(f, "{v}"),
            NormalizedValue::BigInt(v) => write!(f, "{v}"),
            NormalizedValue::Bool(v) => write!(f, "{v}"),
            NormalizedValue::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            NormalizedValue::Str(s) => write!(f, "{s}"),
            NormalizedValue::Address(a) => write!(f, "{a}"),
            NormalizedValue::Array(v) => {
                let parts: Vec<_> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            NormalizedValue::Tuple(fields) => {
                let parts: Vec<_> = fields.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// Convert a decoded `DynSolValue` into a `NormalizedValue`.
pub fn normalize(val: DynSolValue) -> NormalizedValue {
    match val {
        DynSolValue::Bool(b) => NormalizedValue::Bool(b),
        DynSolValue::Int(i, _bits) => match i128::try_from(i) {
            Ok(v) => NormalizedValue::Int(v),
            Err(_) => NormalizedValue::BigInt(i.to_string()),
        },
        DynSolValue::Uint(u, _bits) => match u128::try_from(u) {
            Ok(v) => NormalizedValue::Uint(v),
            Err(_) => NormalizedValue::BigUint(u.to_string()),
        },
        DynSolValue::FixedBytes(word, size) => NormalizedValue::Bytes(word[..size].to_vec()),
        DynSolValue::Bytes(b) => NormalizedValue::Bytes(b),
        DynSolValue::String(s) => NormalizedValue::Str(s),
        DynSolValue::Address(a) => NormalizedValue::Address(checksum(&a)),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) => {
            NormalizedValue::Array(vals.into_iter().map(normalize).collect())
        }
        DynSolValue::Tuple(fields) => NormalizedValue::Tuple(
            fields
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), normalize(v)))
                .collect(),
        ),
        DynSolValue::Function(f) => NormalizedValue::Bytes(f.to_vec()),
    }
}

pub(crate) fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, I256};

    #[test]
    fn small_and_big_uints() {
        assert_eq!(normalize(DynSolValue::Uint(U256::from(42u64), 256)), NormalizedValue::Uint(42));
        let big = normalize(DynSolValue::Uint(U256::MAX, 256));
        assert!(matches!(big, NormalizedValue::BigUint(_)));
        assert_eq!(big.as_u256(), Some(U256::MAX));
    }

    #[test]
    fn negative_int() {
        let v = normalize(DynSolValue::Int("-5".parse::<I256>().unwrap(), 256));
        assert_eq!(v, NormalizedValue::Int(-5));
    }

    #[test]
    fn address_is_checksummed() {
        let addr: Address = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045".parse().unwrap();
        let v = normalize(DynSolValue::Address(addr));
        assert_eq!(v.as_address(), Some("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"));
    }

    #[test]
    fn fixed_bytes_truncated_to_size() {
        let v = normalize(DynSolValue::FixedBytes(B256::repeat_byte(0xab), 4));
        assert_eq!(v.as_bytes(), Some(&[0xab, 0xab, 0xab, 0xab][..]));
    }
}
