//! Gossip messages of the enode subsystem.
//!
//! Each message serializes as a fixed field sequence with little-endian
//! integers and compact-size length prefixes; identities are double
//! SHA-256 over the declared fields in declared order. The signed forms
//! are ASCII string concatenations reproduced byte-for-byte, so two
//! implementations can verify each other's signatures.

pub mod announce;
pub mod error;
pub mod ping;
pub mod verify;
pub mod vote;
pub mod wire;

pub use announce::Announce;
pub use error::CodecError;
pub use ping::Ping;
pub use verify::Verify;
pub use vote::PaymentVote;

use wire::{Reader, Writer};

/// Wire command tokens, stable across implementations.
pub mod commands {
    /// Full enode announcement.
    pub const MNANNOUNCE: &str = "mnannounce";
    /// Liveness ping.
    pub const MNPING: &str = "mnping";
    /// Registry list / single entry request.
    pub const DSEG: &str = "dseg";
    /// PoSe verification challenge.
    pub const MNVERIFY: &str = "mnverify";
    /// Payment-winner vote.
    pub const MNPAYMENTVOTE: &str = "mnpaymentvote";
    /// Payment winners sync request.
    pub const MNPAYMENTSYNC: &str = "mnpaymentsync";
    /// Payment data for a single block.
    pub const MNPAYMENTBLOCK: &str = "mnpaymentblock";
    /// Per-asset sync item count.
    pub const SYNCSTATUSCOUNT: &str = "syncstatuscount";
}

/// Inventory type ids for pull-based relay.
pub mod inv {
    /// Payment vote.
    pub const PAYMENT_VOTE: u32 = 9;
    /// Payment block data.
    pub const PAYMENT_BLOCK: u32 = 10;
    /// Enode announcement.
    pub const ANNOUNCE: u32 = 14;
    /// Enode ping.
    pub const PING: u32 = 15;
    /// PoSe verification.
    pub const VERIFY: u32 = 19;
}

/// Sync asset ids carried by `SYNCSTATUSCOUNT`.
pub mod sync_items {
    /// Registry list.
    pub const LIST: i32 = 2;
    /// Payment winners.
    pub const WINNERS: i32 = 3;
}

/// Encode a `DSEG` request payload: a null outpoint asks for the whole
/// list, anything else for one entry.
pub fn encode_dseg(outpoint: &enode_types::Outpoint) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_outpoint_input(outpoint);
    w.into_bytes()
}

/// Decode a `DSEG` request payload.
pub fn decode_dseg(bytes: &[u8]) -> Result<enode_types::Outpoint, CodecError> {
    let mut r = Reader::new(bytes);
    let outpoint = r.read_outpoint_input()?;
    r.finish()?;
    Ok(outpoint)
}

/// Per-asset item count a peer reports at the end of a sync stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatusCount {
    /// Asset id (`sync_items`).
    pub item_id: i32,
    /// Items the peer sent.
    pub count: i32,
}

impl SyncStatusCount {
    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_i32(self.item_id);
        w.write_i32(self.count);
        w.into_bytes()
    }

    /// Decode from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let msg = Self {
            item_id: r.read_i32()?,
            count: r.read_i32()?,
        };
        r.finish()?;
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_status_count_roundtrip() {
        let msg = SyncStatusCount {
            item_id: sync_items::WINNERS,
            count: 42,
        };
        assert_eq!(SyncStatusCount::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }
}
