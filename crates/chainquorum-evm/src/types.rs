//! Raw EVM log and block-range types.

use serde::{Deserialize, Serialize};

/// A raw EVM log as returned by `eth_getLogs` / `eth_getFilterLogs`.
///
/// Positional fields are optional on the wire (pending logs carry `null`);
/// the decoder rejects logs without them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    /// Block number, if present and well-formed.
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_quantity)
    }

    /// Log index within the block, if present and well-formed.
    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(parse_quantity)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Chain-order sort key: `(block, logIndex)`. Missing parts sort last.
    pub fn position(&self) -> (u64, u64) {
        (
            self.block_number_u64().unwrap_or(u64::MAX),
            self.log_index_u64().unwrap_or(u64::MAX),
        )
    }
}

/// Inclusive block range `[from, to]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// `head..=head`: the bootstrap range.
    pub fn single(block: u64) -> Self {
        Self::new(block, block)
    }

    pub fn contains(&self, block: u64) -> bool {
        block >= self.from && block <= self.to
    }

    /// Number of blocks in the range.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    /// Never true for a well-formed range; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Strict JSON-RPC quantity parser: `0x`-prefixed, non-empty hex.
pub fn parse_quantity(s: &str) -> Option<u64> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Encode a block number as a JSON-RPC quantity (`0x64`).
pub fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}
