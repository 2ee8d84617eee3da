//! Keccak-256 helpers: event topic0 and hashed indexed values.
//!
//! The fingerprint of an EVM event is the keccak256 hash of its canonical
//! signature string, e.g.:
//!   keccak256("Transfer(address,address,uint256)")
//!   → 0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef

use tiny_keccak::{Hasher, Keccak};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    output
}

/// `0x`-prefixed topic0 for a canonical signature `"Name(type1,type2,...)"`.
pub fn signature_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes())))
}

/// Parse a 32-byte topic. Accepts mixed case; requires the `0x` prefix.
pub fn parse_topic(topic: &str) -> Option<[u8; 32]> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(hex, &mut out).ok()?;
    Some(out)
}

/// Lowercase `0x`-prefixed hex form of a 32-byte word.
pub fn topic_hex(word: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erc20_transfer_topic() {
        assert_eq!(
            signature_topic("Transfer(address,address,uint256)"),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
    }

    #[test]
    fn parse_topic_rejects_bad_input() {
        assert!(parse_topic("0x12").is_none());
        assert!(parse_topic(&"ab".repeat(32)).is_none());
        let t = format!("0x{}", "AB".repeat(32));
        assert_eq!(parse_topic(&t), Some([0xab; 32]));
        assert_eq!(topic_hex(&[0xab; 32]), t.to_lowercase());
    }
}
