//! chainquorum-evm — quorum-verified contract event ingestion for EVM chains.
//!
//! # Architecture
//!
//! ```text
//! EventServiceBuilder → EventService
//!                           ├── Poller          (cursor, tick loop, backoff, diagnostics)
//!                           │     ├── LogSource (eth_getLogs ranges / installed filters)
//!                           │     └── EventDecoder (topic0 → ABI event → named args)
//!                           ├── Dispatcher      (per-subscription ordered workers)
//!                           └── ReceiptResolver (on-demand quorum receipts)
//!
//! every read ──▶ chainquorum_core::QuorumClient ──▶ N providers, majority agreement
//! ```

pub mod config;
pub mod contract;
pub mod cursor;
pub mod decoder;
pub mod dispatcher;
pub mod events;
pub mod fingerprint;
pub mod poller;
pub mod receipt;
pub mod service;
pub mod source;
pub mod types;
pub mod value;

pub use config::{AbiSource, ConfigError, ContractConfig, LogConfig, ProviderConfig, ServiceConfig};
pub use contract::{ContractDescriptor, EventSpec, LogTarget};
pub use cursor::{BlockCursor, NextRange};
pub use decoder::{DecodeError, DecodedEvent, EventDecoder};
pub use dispatcher::{DispatchError, DispatchedEvent, Dispatcher, EventHandler, SubscriptionId};
pub use events::{marketplace_abi, MarketplaceEvent};
pub use poller::{PollError, Poller, PollerConfig, PollerEvent, PollerState, TickOutcome};
pub use receipt::{Receipt, ReceiptAccessor, ReceiptError, ReceiptResolver};
pub use service::{EventService, EventServiceBuilder, ServiceError};
pub use source::{FilterLogSource, LogSource, LogSourceKind, RangeLogSource};
pub use types::{BlockRange, RawLog};
pub use value::NormalizedValue;
