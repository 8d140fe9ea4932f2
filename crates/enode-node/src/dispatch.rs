//! Inbound message dispatch.
//!
//! Decodes wire payloads, routes them to the owning component, and
//! applies the returned DoS score to the sending peer. Decode failures
//! are protocol violations and score the maximum.

use crate::Services;
use enode_chain::{Chain, Net, PeerId};
use enode_messages::{
    commands, decode_dseg, Announce, PaymentVote, Ping, SyncStatusCount, Verify,
};
use tracing::{debug, warn};

/// DoS score for undecodable payloads.
const MALFORMED_SCORE: u32 = 100;

impl Services {
    /// Handle one inbound message from a peer.
    pub fn handle_message(&self, peer: &PeerId, command: &str, payload: &[u8]) {
        // Everything here rides on chain context being available.
        if !self.chain.is_synced() {
            debug!(command, "ignoring enode message before blockchain sync");
            return;
        }
        let now = self.chain.adjusted_time();

        let dos = match command {
            commands::MNANNOUNCE => match Announce::from_bytes(payload) {
                Ok(mnb) => {
                    debug!(enode = %mnb.outpoint, "enode announce received");
                    let (_, dos) = self.registry.check_and_update(Some(peer), &mnb, false, now);
                    dos
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed announce");
                    MALFORMED_SCORE
                }
            },
            commands::MNPING => match Ping::from_bytes(payload) {
                Ok(ping) => {
                    let (_, dos) = self.registry.handle_ping(Some(peer), &ping, now);
                    dos
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed ping");
                    MALFORMED_SCORE
                }
            },
            commands::DSEG => match decode_dseg(payload) {
                Ok(outpoint) => {
                    self.registry.handle_dseg(peer, outpoint, now);
                    0
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed dseg");
                    MALFORMED_SCORE
                }
            },
            commands::MNVERIFY => match Verify::from_bytes(payload) {
                Ok(mnv) => {
                    let (_, dos) = self.registry.handle_verify(peer, mnv, now);
                    dos
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed verify");
                    MALFORMED_SCORE
                }
            },
            commands::MNPAYMENTVOTE => match PaymentVote::from_bytes(payload) {
                Ok(vote) => {
                    let (_, dos) = self.payments.handle_vote(peer, vote, now);
                    dos
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed payment vote");
                    MALFORMED_SCORE
                }
            },
            commands::MNPAYMENTSYNC => {
                let (_, dos) = self.payments.handle_payment_sync(peer, now);
                dos
            }
            commands::SYNCSTATUSCOUNT => match SyncStatusCount::from_bytes(payload) {
                Ok(status) => {
                    self.sync
                        .note_status_count(status.item_id, status.count, now);
                    0
                }
                Err(err) => {
                    warn!(peer = %peer.addr, error = %err, "malformed sync status");
                    MALFORMED_SCORE
                }
            },
            _ => {
                debug!(command, "not an enode message");
                0
            }
        };

        if dos > 0 {
            self.net.misbehaving(peer, dos);
        }
    }
}
