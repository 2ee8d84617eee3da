//! Block cursor — the last block whose logs were fully processed.

use serde::{Deserialize, Serialize};

use crate::types::BlockRange;

/// What a tick should do for a given head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRange {
    /// First successful poll: `head..=head`, no backfill.
    Bootstrap(BlockRange),
    /// `cursor + 1..=head`.
    Advance(BlockRange),
    /// Head equals the cursor.
    Unchanged,
    /// Head is below the cursor (the agreeing providers are lagging).
    Behind { cursor: u64, head: u64 },
}

/// Monotonically non-decreasing position in the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCursor {
    last: Option<u64>,
}

impl BlockCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cursor that already processed `block`.
    pub fn at(block: u64) -> Self {
        Self { last: Some(block) }
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Range to fetch for `head`. Never mutates the cursor.
    pub fn next_range(&self, head: u64) -> NextRange {
        match self.last {
            None => NextRange::Bootstrap(BlockRange::single(head)),
            Some(last) if head == last => NextRange::Unchanged,
            Some(last) if head < last => NextRange::Behind { cursor: last, head },
            Some(last) => NextRange::Advance(BlockRange::new(last + 1, head)),
        }
    }

    /// Move to `block`. Lower values are ignored; the cursor never goes back.
    pub fn advance(&mut self, block: u64) {
        match self.last {
            Some(last) if block <= last => {}
            _ => self.last = Some(block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bootstrap_then_advance() {
        let mut c = BlockCursor::new();
        assert_eq!(c.next_range(100), NextRange::Bootstrap(BlockRange::new(100, 100)));
        c.advance(100);
        assert_eq!(c.next_range(105), NextRange::Advance(BlockRange::new(101, 105)));
        assert_eq!(c.next_range(100), NextRange::Unchanged);
        assert_eq!(c.next_range(98), NextRange::Behind { cursor: 100, head: 98 });
    }

    #[test]
    fn never_moves_backwards() {
        let mut c = BlockCursor::at(50);
        c.advance(40);
        assert_eq!(c.last(), Some(50));
        c.advance(51);
        assert_eq!(c.last(), Some(51));
    }
}
