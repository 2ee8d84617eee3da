//! Marketplace domain events: the built-in ABI and typed views.
//!
//! The views are conveniences over `DecodedEvent`; handlers that prefer the
//! generic argument map can ignore them entirely.

use alloy_json_abi::JsonAbi;
use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::decoder::DecodedEvent;
use crate::value::NormalizedValue;

/// ABI for the three marketplace events.
pub const MARKETPLACE_ABI: &str = r#"[
  {
    "type": "event",
    "name": "Purchase",
    "anonymous": false,
    "inputs": [
      {"name": "buyer",       "type": "address", "indexed": true},
      {"name": "artist",      "type": "address", "indexed": true},
      {"name": "releaseId",   "type": "uint256", "indexed": true},
      {"name": "userId",      "type": "string",  "indexed": false},
      {"name": "amountPaid",  "type": "uint256", "indexed": false},
      {"name": "artistShare", "type": "uint256", "indexed": false},
      {"name": "platformFee", "type": "uint256", "indexed": false}
    ]
  },
  {
    "type": "event",
    "name": "PurchaseEdition",
    "anonymous": false,
    "inputs": [
      {"name": "buyer",       "type": "address", "indexed": true},
      {"name": "artist",      "type": "address", "indexed": true},
      {"name": "editionId",   "type": "uint256", "indexed": true},
      {"name": "amountPaid",  "type": "uint256", "indexed": false},
      {"name": "artistShare", "type": "uint256", "indexed": false},
      {"name": "platformFee", "type": "uint256", "indexed": false},
      {"name": "releaseId",   "type": "uint256", "indexed": false}
    ]
  },
  {
    "type": "event",
    "name": "EditionMinted",
    "anonymous": false,
    "inputs": [
      {"name": "releaseId", "type": "uint256", "indexed": true},
      {"name": "artist",    "type": "address", "indexed": true},
      {"name": "objectId",  "type": "uint256", "indexed": false},
      {"name": "editionId", "type": "uint256", "indexed": false}
    ]
  }
]"#;

/// Parse [`MARKETPLACE_ABI`].
pub fn marketplace_abi() -> Result<JsonAbi, serde_json::Error> {
    serde_json::from_str(MARKETPLACE_ABI)
}

/// Errors converting a `DecodedEvent` into a typed view.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventViewError {
    #[error("expected event '{expected}', got '{found}'")]
    WrongEvent { expected: &'static str, found: String },

    #[error("event '{event}' has no argument '{field}'")]
    MissingField { event: &'static str, field: &'static str },

    #[error("argument '{field}' of '{event}' has unexpected type")]
    InvalidField { event: &'static str, field: &'static str },
}

/// A sale of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub buyer: Address,
    pub artist: Address,
    pub release_id: U256,
    pub user_id: String,
    pub amount_paid: U256,
    pub artist_share: U256,
    pub platform_fee: U256,
}

/// A sale of a numbered edition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseEdition {
    pub buyer: Address,
    pub artist: Address,
    pub edition_id: U256,
    pub amount_paid: U256,
    pub artist_share: U256,
    pub platform_fee: U256,
    pub release_id: U256,
}

/// A new edition object minted for a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditionMinted {
    pub release_id: U256,
    pub artist: Address,
    pub object_id: U256,
    pub edition_id: U256,
}

/// Any of the marketplace events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketplaceEvent {
    Purchase(Purchase),
    PurchaseEdition(PurchaseEdition),
    EditionMinted(EditionMinted),
}

struct Fields<'a> {
    event: &'static str,
    decoded: &'a DecodedEvent,
}

impl<'a> Fields<'a> {
    fn open(expected: &'static str, decoded: &'a DecodedEvent) -> Result<Self, EventViewError> {
        if decoded.name != expected {
            return Err(EventViewError::WrongEvent {
                expected,
                found: decoded.name.clone(),
            });
        }
        Ok(Self {
            event: expected,
            decoded,
        })
    }

    fn get(&self, field: &'static str) -> Result<&'a NormalizedValue, EventViewError> {
        self.decoded.arg(field).ok_or(EventViewError::MissingField {
            event: self.event,
            field,
        })
    }

    fn invalid(&self, field: &'static str) -> EventViewError {
        EventViewError::InvalidField {
            event: self.event,
            field,
        }
    }

    fn address(&self, field: &'static str) -> Result<Address, EventViewError> {
        self.get(field)?
            .as_address()
            .and_then(|a| a.parse().ok())
            .ok_or_else(|| self.invalid(field))
    }

    fn uint(&self, field: &'static str) -> Result<U256, EventViewError> {
        self.get(field)?.as_u256().ok_or_else(|| self.invalid(field))
    }

    fn string(&self, field: &'static str) -> Result<String, EventViewError> {
        self.get(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.invalid(field))
    }
}

impl TryFrom<&DecodedEvent> for Purchase {
    type Error = EventViewError;

    fn try_from(ev: &DecodedEvent) -> Result<Self, Self::Error> {
        let f = Fields::open("Purchase", ev)?;
        Ok(Self {
            buyer: f.address("buyer")?,
            artist: f.address("artist")?,
            release_id: f.uint("releaseId")?,
            user_id: f.string("userId")?,
            amount_paid: f.uint("amountPaid")?,
            artist_share: f.uint("artistShare")?,
            platform_fee: f.uint("platformFee")?,
        })
    }
}

impl TryFrom<&DecodedEvent> for PurchaseEdition {
    type Error = EventViewError;

    fn try_from(ev: &DecodedEvent) -> Result<Self, Self::Error> {
        let f = Fields::open("PurchaseEdition", ev)?;
        Ok(Self {
            buyer: f.address("buyer")?,
            artist: f.address("artist")?,
            edition_id: f.uint("editionId")?,
            amount_paid: f.uint("amountPaid")?,
            artist_share: f.uint("artistShare")?,
            platform_fee: f.uint("platformFee")?,
            release_id: f.uint("releaseId")?,
        })
    }
}

impl TryFrom<&DecodedEvent> for EditionMinted {
    type Error = EventViewError;

    fn try_from(ev: &DecodedEvent) -> Result<Self, Self::Error> {
        let f = Fields::open("EditionMinted", ev)?;
        Ok(Self {
            release_id: f.uint("releaseId")?,
            artist: f.address("artist")?,
            object_id: f.uint("objectId")?,
            edition_id: f.uint("editionId")?,
        })
    }
}

impl TryFrom<&DecodedEvent> for MarketplaceEvent {
    type Error = EventViewError;

    fn try_from(ev: &DecodedEvent) -> Result<Self, Self::Error> {
        match ev.name.as_str() {
            "Purchase" => Purchase::try_from(ev).map(Self::Purchase),
            "PurchaseEdition" => PurchaseEdition::try_from(ev).map(Self::PurchaseEdition),
            "EditionMinted" => EditionMinted::try_from(ev).map(Self::EditionMinted),
            other => Err(EventViewError::WrongEvent {
                expected: "Purchase | PurchaseEdition | EditionMinted",
                found: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn decoded(name: &str, args: Vec<(&str, NormalizedValue)>) -> DecodedEvent {
        DecodedEvent {
            name: name.into(),
            args: args.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<IndexMap<_, _>>(),
            address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".into(),
            transaction_hash: format!("0x{}", "aa".repeat(32)),
            block_hash: None,
            block_number: 103,
            log_index: 2,
        }
    }

    #[test]
    fn abi_has_three_events() {
        let abi = marketplace_abi().unwrap();
        for name in ["Purchase", "PurchaseEdition", "EditionMinted"] {
            assert!(abi.event(name).is_some(), "{name}");
        }
    }

    #[test]
    fn edition_minted_view() {
        let ev = decoded(
            "EditionMinted",
            vec![
                ("releaseId", NormalizedValue::Uint(9)),
                ("artist", NormalizedValue::Address("0x70997970C51812dc3A010C7d01b50e0d17dc79C8".into())),
                ("objectId", NormalizedValue::Uint(1)),
                ("editionId", NormalizedValue::Uint(3)),
            ],
        );
        let view = EditionMinted::try_from(&ev).unwrap();
        assert_eq!(view.release_id, U256::from(9u64));
        assert_eq!(view.edition_id, U256::from(3u64));
        assert!(matches!(MarketplaceEvent::try_from(&ev), Ok(MarketplaceEvent::EditionMinted(_))));
    }

    #[test]
    fn wrong_name_and_missing_field() {
        let ev = decoded("EditionMinted", vec![("releaseId", NormalizedValue::Uint(9))]);
        assert!(matches!(Purchase::try_from(&ev), Err(EventViewError::WrongEvent { .. })));
        assert_eq!(
            EditionMinted::try_from(&ev).unwrap_err(),
            EventViewError::MissingField {
                event: "EditionMinted",
                field: "artist"
            }
        );
    }
}
