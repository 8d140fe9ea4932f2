//! Proof-of-service verification.
//!
//! Top-ranked enodes challenge peers to prove they control the
//! operating key behind their advertised address. A verified node's
//! PoSe score drops; everything else advertising the same address gets
//! its score bumped until the ban threshold ends the dispute.

use crate::record::Enode;
use crate::registry::{EnodeRegistry, MAX_POSE_BLOCKS};
use enode_chain::PeerId;
use enode_messages::{commands, inv, Verify};
use enode_types::params::MIN_PAYMENT_PROTO_V1;
use enode_types::NetAddr;
use rand::Rng;
use tracing::{debug, info, warn};

/// Only this many top ranks send and answer verifications.
pub const MAX_POSE_RANK: usize = 10;

/// Verification connections opened per step.
pub const MAX_POSE_CONNECTIONS: usize = 10;

/// Oldest protocol participating in verification.
const POSE_MIN_PROTOCOL: i32 = MIN_PAYMENT_PROTO_V1;

/// How long a fulfilled verify request blocks a repeat.
const VERIFY_FULFILLED_SECONDS: i64 = 3600;

/// Behavior flag for the broadcast handler: the original returned
/// early when signature verification *succeeded*, which reads as a
/// bug. `true` requires both signatures to verify before any score
/// changes; `false` restores the original short-circuit.
pub const VERIFY_BROADCAST_REQUIRES_VALID_SIGS: bool = true;

const REQ_REQUEST: &str = "mnverify-request";
const REQ_REPLY: &str = "mnverify-reply";
const REQ_DONE: &str = "mnverify-done";

impl EnodeRegistry {
    fn has_fulfilled(&self, addr: &NetAddr, kind: &'static str) -> bool {
        self.inner
            .read()
            .fulfilled_requests
            .contains_key(&(*addr, kind))
    }

    fn add_fulfilled(&self, addr: NetAddr, kind: &'static str, now: i64) {
        self.inner
            .write()
            .fulfilled_requests
            .insert((addr, kind), now + VERIFY_FULFILLED_SECONDS);
    }

    /// One verification step, run on tip updates.
    ///
    /// Only runs when this node is itself ranked in the top
    /// [`MAX_POSE_RANK`]; picks targets starting past the top ranks and
    /// striding by [`MAX_POSE_CONNECTIONS`] so concurrent verifiers
    /// spread over the list.
    pub fn do_full_verification_step(&self, now: i64) {
        let Some(identity) = self.identity.get() else {
            return;
        };
        if !self.sync.is_synced() {
            return;
        }
        let Some(tip) = self.tip_height() else { return };

        let ranks = self.get_ranks(tip.saturating_sub(1), POSE_MIN_PROTOCOL);

        let mut my_rank = None;
        for (rank, mn) in &ranks {
            if *rank > MAX_POSE_RANK {
                debug!(rank = *rank, "not in verification top ranks");
                return;
            }
            if mn.outpoint == identity.outpoint {
                my_rank = Some(*rank);
                break;
            }
        }
        // List too short, or we are not enabled.
        let Some(my_rank) = my_rank else { return };
        debug!(
            rank = my_rank,
            total = ranks.len(),
            "running verification step"
        );

        let mut offset = MAX_POSE_RANK + my_rank - 1;
        let mut sent = 0;
        while offset < ranks.len() {
            let (_, target) = &ranks[offset];
            if target.is_pose_verified() || target.is_pose_banned() {
                debug!(
                    enode = %target.outpoint,
                    verified = target.is_pose_verified(),
                    banned = target.is_pose_banned(),
                    "skipping verification target"
                );
                offset += MAX_POSE_CONNECTIONS;
                continue;
            }
            debug!(enode = %target.outpoint, addr = %target.addr, "verifying enode");
            if self.send_verify_request(target.addr, now) {
                sent += 1;
                if sent >= MAX_POSE_CONNECTIONS {
                    break;
                }
            }
            offset += MAX_POSE_CONNECTIONS;
        }
        debug!(sent, "verification requests sent");
    }

    /// Open a connection and challenge whoever answers at `addr`.
    fn send_verify_request(&self, addr: NetAddr, now: i64) -> bool {
        if self.has_fulfilled(&addr, REQ_REQUEST) {
            debug!(%addr, "verify request already outstanding");
            return false;
        }
        let Some(peer) = self.net.connect(addr) else {
            warn!(%addr, "cannot connect for verification");
            return false;
        };
        let Some(tip) = self.tip_height() else {
            return false;
        };
        self.add_fulfilled(addr, REQ_REQUEST, now);

        let nonce = rand::thread_rng().gen_range(1..1_000_000u32);
        let mnv = Verify::request(addr, nonce, tip.saturating_sub(1));
        self.inner
            .write()
            .we_asked_for_verification
            .insert(addr, mnv.clone());
        info!(%addr, nonce, "sending verify request");
        self.net.send(&peer, commands::MNVERIFY, mnv.to_bytes());
        true
    }

    /// Dispatch an inbound `MNVERIFY` by phase.
    pub fn handle_verify(&self, peer: &PeerId, mnv: Verify, now: i64) -> (bool, u32) {
        if mnv.is_request() {
            self.send_verify_reply(peer, mnv, now)
        } else if mnv.is_reply() {
            self.process_verify_reply(peer, &mnv, now)
        } else {
            self.process_verify_broadcast(peer, &mnv, now)
        }
    }

    /// Case 1: someone asked us to prove our key at our address.
    fn send_verify_reply(&self, peer: &PeerId, mut mnv: Verify, now: i64) -> (bool, u32) {
        let Some(identity) = self.identity.get() else {
            // Not an enode; a spoofer may be probing our address.
            // Do not penalize the asking peer.
            return (false, 0);
        };
        if self.has_fulfilled(&peer.addr, REQ_REPLY) {
            warn!(peer = %peer.addr, "peer asked for verification again too soon");
            return (false, 20);
        }
        let Ok(block_hash) = self.chain.block_hash_at(mnv.block_height) else {
            debug!(height = mnv.block_height, "verify for unknown height");
            return (false, 0);
        };
        if mnv
            .sign_reply(&*self.signer, &identity.enode_key, &block_hash)
            .is_err()
        {
            warn!("failed to sign verify reply");
            return (false, 0);
        }
        self.net.send(peer, commands::MNVERIFY, mnv.to_bytes());
        self.add_fulfilled(peer.addr, REQ_REPLY, now);
        (true, 0)
    }

    /// Case 2: the reply to a challenge we issued.
    fn process_verify_reply(&self, peer: &PeerId, mnv: &Verify, now: i64) -> (bool, u32) {
        // We must have actually asked this address.
        if !self.has_fulfilled(&peer.addr, REQ_REQUEST) {
            warn!(peer = %peer.addr, "unsolicited verify reply");
            return (false, 20);
        }
        let asked = self
            .inner
            .read()
            .we_asked_for_verification
            .get(&peer.addr)
            .cloned();
        let Some(asked) = asked else {
            warn!(peer = %peer.addr, "no verification state for peer");
            return (false, 20);
        };
        if asked.nonce != mnv.nonce {
            warn!(
                peer = %peer.addr,
                requested = asked.nonce,
                received = mnv.nonce,
                "verify reply nonce mismatch"
            );
            return (false, 20);
        }
        if asked.block_height != mnv.block_height {
            warn!(peer = %peer.addr, "verify reply height mismatch");
            return (false, 20);
        }
        let Ok(block_hash) = self.chain.block_hash_at(mnv.block_height) else {
            return (false, 0);
        };
        if self.has_fulfilled(&peer.addr, REQ_DONE) {
            warn!(peer = %peer.addr, "address already verified recently");
            return (false, 20);
        }

        let identity = self.identity.get();
        let mut real: Option<Enode> = None;
        let mut fakes: Vec<Enode> = Vec::new();
        for mn in self.all() {
            if mn.addr != peer.addr {
                continue;
            }
            if mnv
                .verify_reply_sig(&*self.signer, &mn.enode_pubkey, &block_hash)
                .is_ok()
            {
                real = Some(mn);
            } else {
                fakes.push(mn);
            }
        }

        let Some(real) = real else {
            // Nobody at this address could produce the signature.
            warn!(peer = %peer.addr, "no real enode found at verified address");
            return (false, 20);
        };

        {
            let mut inner = self.inner.write();
            if let Some(mn) = inner
                .enodes
                .iter_mut()
                .find(|mn| mn.outpoint == real.outpoint)
            {
                if !mn.is_pose_verified() {
                    mn.decrease_pose_ban_score();
                }
            }
            for fake in &fakes {
                if let Some(mn) = inner
                    .enodes
                    .iter_mut()
                    .find(|mn| mn.outpoint == fake.outpoint)
                {
                    mn.increase_pose_ban_score();
                    debug!(
                        enode = %mn.outpoint,
                        score = mn.pose_ban_score,
                        "PoSe score bumped for duplicate address"
                    );
                }
            }
        }
        self.add_fulfilled(peer.addr, REQ_DONE, now);
        info!(
            enode = %real.outpoint,
            addr = %peer.addr,
            fakes = fakes.len(),
            "verified real enode"
        );

        // Broadcast the proof if we can sign it as an active enode.
        if let Some(identity) = identity {
            let mut out = mnv.clone();
            out.addr = real.addr;
            out.outpoint1 = real.outpoint;
            out.outpoint2 = identity.outpoint;
            if out
                .sign_broadcast(&*self.signer, &identity.enode_key, &block_hash)
                .is_err()
            {
                warn!("failed to sign verify broadcast");
                return (false, 0);
            }
            self.inner
                .write()
                .we_asked_for_verification
                .insert(peer.addr, out.clone());
            self.seen_verifies.insert(out.hash(), out.clone());
            self.net.relay_inventory(inv::VERIFY, out.hash());
        }

        (true, 0)
    }

    /// Case 3: a broadcast proof signed by some verifier.
    fn process_verify_broadcast(&self, peer: &PeerId, mnv: &Verify, _now: i64) -> (bool, u32) {
        let hash = mnv.hash();
        if self.seen_verifies.contains_key(&hash) {
            return (true, 0);
        }
        self.seen_verifies.insert(hash, mnv.clone());

        let Some(tip) = self.tip_height() else {
            return (false, 0);
        };
        // History is uninteresting.
        if mnv.block_height < tip.saturating_sub(MAX_POSE_BLOCKS) {
            debug!(
                current = tip,
                verification = mnv.block_height,
                "outdated verify broadcast"
            );
            return (false, 0);
        }

        if mnv.outpoint1 == mnv.outpoint2 {
            warn!(peer = %peer.addr, "verify broadcast with identical outpoints");
            return (false, 100);
        }

        let Ok(block_hash) = self.chain.block_hash_at(mnv.block_height) else {
            debug!(height = mnv.block_height, "verify for unknown height");
            return (false, 0);
        };

        // The verifier itself must be rank-gated.
        let Some(rank) = self.get_rank(&mnv.outpoint2, mnv.block_height, POSE_MIN_PROTOCOL)
        else {
            debug!(enode = %mnv.outpoint2, "cannot rank verify sender");
            return (false, 0);
        };
        if rank > MAX_POSE_RANK {
            debug!(enode = %mnv.outpoint2, rank, "verifier not in top ranks");
            return (false, 0);
        }

        let Some(mn1) = self.get(&mnv.outpoint1) else {
            debug!(enode = %mnv.outpoint1, "unknown verified enode");
            return (false, 0);
        };
        let Some(mn2) = self.get(&mnv.outpoint2) else {
            debug!(enode = %mnv.outpoint2, "unknown verifying enode");
            return (false, 0);
        };
        if mn1.addr != mnv.addr {
            debug!(addr = %mnv.addr, "verify address does not match record");
            return (false, 0);
        }

        if VERIFY_BROADCAST_REQUIRES_VALID_SIGS {
            if mnv
                .verify_reply_sig(&*self.signer, &mn1.enode_pubkey, &block_hash)
                .is_err()
            {
                warn!(enode = %mnv.outpoint1, "bad verify signature from verified enode");
                return (false, 0);
            }
            if mnv
                .verify_broadcast_sig(&*self.signer, &mn2.enode_pubkey, &block_hash)
                .is_err()
            {
                warn!(enode = %mnv.outpoint2, "bad verify signature from verifier");
                return (false, 0);
            }
        }

        let mut bumped = 0;
        {
            let mut inner = self.inner.write();
            if let Some(mn) = inner
                .enodes
                .iter_mut()
                .find(|mn| mn.outpoint == mnv.outpoint1)
            {
                if !mn.is_pose_verified() {
                    mn.decrease_pose_ban_score();
                }
            }
            for mn in inner.enodes.iter_mut() {
                if mn.addr != mnv.addr || mn.outpoint == mnv.outpoint1 {
                    continue;
                }
                mn.increase_pose_ban_score();
                bumped += 1;
            }
        }
        self.net.relay_inventory(inv::VERIFY, hash);
        info!(
            enode = %mnv.outpoint1,
            addr = %mnv.addr,
            duplicates = bumped,
            "verify broadcast accepted"
        );
        (true, 0)
    }

    /// Resolve address collisions against already-verified records.
    ///
    /// Clusters the registry by address; wherever a cluster holds a
    /// PoSe-verified member, every other member's score is bumped. A
    /// cluster with no verified member is left alone until
    /// verification settles who is real.
    pub fn check_same_addr(&self) {
        if !self.sync.is_synced() || self.size() == 0 {
            return;
        }

        let mut to_ban: Vec<enode_types::Outpoint> = Vec::new();
        {
            let inner = self.inner.read();
            let mut sorted: Vec<&Enode> = inner
                .enodes
                .iter()
                .filter(|mn| mn.is_enabled() || mn.is_pre_enabled())
                .collect();
            sorted.sort_by(|a, b| a.addr.cmp(&b.addr));

            let mut prev: Option<&Enode> = None;
            let mut verified: Option<&Enode> = None;
            for mn in sorted {
                match prev {
                    None => {
                        verified = mn.is_pose_verified().then_some(mn);
                    }
                    Some(prev_mn) if prev_mn.addr == mn.addr => {
                        if verified.is_some() {
                            // Someone else at this address is verified.
                            to_ban.push(mn.outpoint);
                        } else if mn.is_pose_verified() {
                            // This one is; everything before it was fake.
                            to_ban.push(prev_mn.outpoint);
                            verified = Some(mn);
                        }
                    }
                    Some(_) => {
                        verified = mn.is_pose_verified().then_some(mn);
                    }
                }
                prev = Some(mn);
            }
        }

        if to_ban.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        for outpoint in to_ban {
            if let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == outpoint) {
                debug!(enode = %mn.outpoint, addr = %mn.addr, "PoSe score bump for shared address");
                mn.increase_pose_ban_score();
            }
        }
    }
}
