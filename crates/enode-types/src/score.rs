//! Election score arithmetic.
//!
//! The per-block score of an enode is the unsigned 256-bit distance
//! between `sha256d(block_hash)` and `sha256d(block_hash || aux)` where
//! `aux = txid + output_index` in Z/2^256. Digests are interpreted as
//! little-endian integers, matching their wire byte order.

use crate::{sha256d, Hash256, Outpoint};
use num_bigint::BigUint;

/// 256-bit score of an outpoint against a block hash.
pub fn score_distance(outpoint: &Outpoint, block_hash: &Hash256) -> BigUint {
    let aux = BigUint::from_bytes_le(outpoint.txid.as_bytes()) + BigUint::from(outpoint.index);

    let h2 = BigUint::from_bytes_le(sha256d(block_hash.as_bytes()).as_bytes());

    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(block_hash.as_bytes());
    buf.extend_from_slice(&uint256_le_bytes(&aux));
    let h3 = BigUint::from_bytes_le(sha256d(&buf).as_bytes());

    if h3 > h2 {
        h3 - h2
    } else {
        h2 - h3
    }
}

/// Compact (nBits-style) encoding of a score, used for ranking.
pub fn compact_from_score(score: &BigUint) -> u32 {
    let bytes = score.to_bytes_be();
    let mut size = bytes.len();
    let mut compact: u32 = if size <= 3 {
        let mut word: u32 = 0;
        for b in &bytes {
            word = (word << 8) | u32::from(*b);
        }
        word << (8 * (3 - size))
    } else {
        (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
    };
    // Keep the mantissa sign bit clear, as the reference encoding does.
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    if score == &BigUint::default() {
        return 0;
    }
    compact | ((size as u32) << 24)
}

/// Serialize a 256-bit value as 32 little-endian bytes.
fn uint256_le_bytes(value: &BigUint) -> [u8; 32] {
    let mut out = [0u8; 32];
    let le = value.to_bytes_le();
    let take = le.len().min(32);
    out[..take].copy_from_slice(&le[..take]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(byte: u8, index: u32) -> Outpoint {
        Outpoint::new(Hash256::from_bytes([byte; 32]), index)
    }

    #[test]
    fn score_matches_hand_computation() {
        let block_hash = sha256d(b"block-109");
        let op = outpoint(0x11, 0);

        let h2 = BigUint::from_bytes_le(sha256d(block_hash.as_bytes()).as_bytes());
        let aux = BigUint::from_bytes_le(op.txid.as_bytes());
        let mut buf = block_hash.as_bytes().to_vec();
        buf.extend_from_slice(&uint256_le_bytes(&aux));
        let h3 = BigUint::from_bytes_le(sha256d(&buf).as_bytes());
        let expected = if h3 > h2 { h3 - h2 } else { h2 - h3 };

        assert_eq!(score_distance(&op, &block_hash), expected);
    }

    #[test]
    fn score_is_symmetric_in_distance() {
        let block_hash = sha256d(b"tip");
        let a = score_distance(&outpoint(0x11, 0), &block_hash);
        let b = score_distance(&outpoint(0x22, 0), &block_hash);
        assert_ne!(a, b);
        // Deterministic across calls.
        assert_eq!(a, score_distance(&outpoint(0x11, 0), &block_hash));
    }

    #[test]
    fn outpoint_index_contributes() {
        let block_hash = sha256d(b"tip");
        assert_ne!(
            score_distance(&outpoint(0x11, 0), &block_hash),
            score_distance(&outpoint(0x11, 1), &block_hash)
        );
    }

    #[test]
    fn compact_encoding_reference_values() {
        // Mirrors the reference nBits examples.
        assert_eq!(compact_from_score(&BigUint::default()), 0);
        assert_eq!(compact_from_score(&BigUint::from(0x12u32)), 0x0112_0000);
        assert_eq!(compact_from_score(&BigUint::from(0x80u32)), 0x0200_8000);
        assert_eq!(
            compact_from_score(&BigUint::from(0x1234_5600u64)),
            0x0412_3456
        );
    }

    #[test]
    fn compact_preserves_order_on_magnitudes() {
        let small = BigUint::from(1u32) << 100;
        let large = BigUint::from(1u32) << 200;
        assert!(compact_from_score(&large) > compact_from_score(&small));
    }
}
