//! The payment-vote engine.
//!
//! Aggregates signed winner votes per height, produces this node's own
//! votes when it is top-ranked, fills the local producer's coinbase and
//! validates everyone else's.

use crate::payees::BlockPayees;
use enode_chain::{
    min_payment_protocol, Chain, CoinbaseOutputs, Net, PeerId, SharedIdentity, Signer, SporkId,
    SporkSet,
};
use enode_messages::{commands, inv, sync_items, PaymentVote, SyncStatusCount};
use enode_registry::{Enode, EnodeRegistry};
use enode_sync::SyncManager;
use enode_types::{
    params::MIN_PAYMENT_PROTO_V1, Hash256, NetAddr, NetworkParams, Outpoint, PayScript,
    DSEG_UPDATE_SECONDS, MAX_INV_SZ, PAYMENT_SIGNATURES_REQUIRED, PAYMENT_SIGNATURES_TOTAL,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Votes are accepted at most this many blocks past the tip.
pub const VOTE_FUTURE_LIMIT: u32 = 20;

/// Blocks of look-ahead when checking whether a node is scheduled.
pub const SCHEDULE_LOOKAHEAD: u32 = 8;

/// Producer votes target this many blocks past a new tip.
pub const VOTE_TARGET_OFFSET: u32 = 5;

/// Vote history kept per enode, in block counts.
const STORAGE_COEFF: f64 = 1.25;

/// Lower bound for the stored vote window.
const MIN_BLOCKS_TO_STORE: usize = 5000;

/// Blocks scanned per tip for last-paid bookkeeping once warmed up.
const LAST_PAID_SCAN_BLOCKS: u32 = 100;

struct VoteStore {
    by_hash: HashMap<Hash256, PaymentVote>,
    last_votes: HashMap<Outpoint, u32>,
}

/// Payment vote and winner bookkeeping.
pub struct PaymentEngine {
    params: NetworkParams,
    chain: Arc<dyn Chain>,
    net: Arc<dyn Net>,
    signer: Arc<dyn Signer>,
    sporks: Arc<SporkSet>,
    sync: Arc<SyncManager>,
    registry: Arc<EnodeRegistry>,
    identity: SharedIdentity,
    votes: Mutex<VoteStore>,
    blocks: Mutex<HashMap<u32, BlockPayees>>,
    sync_asked: Mutex<HashMap<NetAddr, i64>>,
    tip: RwLock<Option<u32>>,
    first_last_paid_run: AtomicBool,
}

impl PaymentEngine {
    /// Create an empty engine.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: NetworkParams,
        chain: Arc<dyn Chain>,
        net: Arc<dyn Net>,
        signer: Arc<dyn Signer>,
        sporks: Arc<SporkSet>,
        sync: Arc<SyncManager>,
        registry: Arc<EnodeRegistry>,
        identity: SharedIdentity,
    ) -> Self {
        Self {
            params,
            chain,
            net,
            signer,
            sporks,
            sync,
            registry,
            identity,
            votes: Mutex::new(VoteStore {
                by_hash: HashMap::new(),
                last_votes: HashMap::new(),
            }),
            blocks: Mutex::new(HashMap::new()),
            sync_asked: Mutex::new(HashMap::new()),
            tip: RwLock::new(None),
            first_last_paid_run: AtomicBool::new(true),
        }
    }

    fn tip_height(&self) -> Option<u32> {
        *self.tip.read()
    }

    /// Vote history window: 1.25 blocks per enode, at least 5000.
    pub fn storage_limit(&self) -> usize {
        ((self.registry.size() as f64 * STORAGE_COEFF) as usize).max(MIN_BLOCKS_TO_STORE)
    }

    /// Stored vote count.
    pub fn vote_count(&self) -> usize {
        self.votes.lock().by_hash.len()
    }

    /// Stored per-height tally count.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Whether the local history looks complete enough to serve peers.
    pub fn is_enough_data(&self) -> bool {
        let average = (PAYMENT_SIGNATURES_TOTAL + PAYMENT_SIGNATURES_REQUIRED) / 2;
        let limit = self.storage_limit();
        self.block_count() > limit && self.vote_count() > limit * average
    }

    /// True once a hash maps to a signature-carrying vote.
    pub fn has_verified_payment_vote(&self, hash: &Hash256) -> bool {
        self.votes
            .lock()
            .by_hash
            .get(hash)
            .map(PaymentVote::is_verified)
            .unwrap_or(false)
    }

    /// One remembered vote per (voter, height); false on a repeat.
    fn can_vote(&self, voter: &Outpoint, block_height: u32) -> bool {
        let mut votes = self.votes.lock();
        if votes.last_votes.get(voter) == Some(&block_height) {
            return false;
        }
        votes.last_votes.insert(*voter, block_height);
        true
    }

    /// Insert a validated vote into both stores.
    pub fn add_payment_vote(&self, vote: &PaymentVote) -> bool {
        // The ranking block must exist for the vote to mean anything.
        if self
            .chain
            .block_hash_at(vote.block_height.wrapping_sub(101))
            .is_err()
        {
            return false;
        }
        let hash = vote.hash();
        if self.has_verified_payment_vote(&hash) {
            return false;
        }
        let mut blocks = self.blocks.lock();
        let mut votes = self.votes.lock();
        votes.by_hash.insert(hash, vote.clone());
        blocks
            .entry(vote.block_height)
            .or_insert_with(|| BlockPayees::new(vote.block_height))
            .add_vote(vote);
        true
    }

    /// Relay a vote by inventory, but only once winners are synced.
    fn relay_vote(&self, vote: &PaymentVote) {
        if !self.sync.is_winners_synced() {
            debug!("not relaying vote before winners sync");
            return;
        }
        self.net.relay_inventory(inv::PAYMENT_VOTE, vote.hash());
    }

    // ==================== inbound votes ====================

    /// Full inbound vote pipeline; returns `(accepted, dos_score)`.
    pub fn handle_vote(&self, peer: &PeerId, vote: PaymentVote, now: i64) -> (bool, u32) {
        // Nothing to check votes against until the list is in.
        if !self.sync.is_list_synced() {
            return (false, 0);
        }
        if peer.version < min_payment_protocol(&self.sporks) {
            return (false, 0);
        }
        let Some(tip) = self.tip_height() else {
            return (false, 0);
        };

        let first_block = tip.saturating_sub(self.storage_limit() as u32);
        if vote.block_height < first_block || vote.block_height > tip + VOTE_FUTURE_LIMIT {
            debug!(
                height = vote.block_height,
                first_block, tip, "vote out of range"
            );
            return (false, 0);
        }

        let hash = vote.hash();
        {
            let mut votes = self.votes.lock();
            if votes.by_hash.contains_key(&hash) {
                debug!(height = vote.block_height, "vote already seen");
                return (false, 0);
            }
            // Park it unverified so a concurrent copy cannot race in.
            let mut placeholder = vote.clone();
            placeholder.mark_not_verified();
            votes.by_hash.insert(hash, placeholder);
        }

        if !self.can_vote(&vote.voter_outpoint, vote.block_height) {
            debug!(voter = %vote.voter_outpoint, "enode already voted at this height");
            return (false, 0);
        }

        let Some(voter) = self.registry.get(&vote.voter_outpoint) else {
            debug!(voter = %vote.voter_outpoint, "vote from unknown enode");
            self.registry.ask_for_entry(peer, &vote.voter_outpoint, now);
            return (false, 0);
        };

        // Old votes may come from nodes that predate the spork switch.
        let min_proto = if vote.block_height >= tip {
            min_payment_protocol(&self.sporks)
        } else {
            MIN_PAYMENT_PROTO_V1
        };
        if voter.protocol_version < min_proto {
            debug!(
                voter = %vote.voter_outpoint,
                version = voter.protocol_version,
                "voter protocol too old"
            );
            return (false, 0);
        }

        if vote.verify_sig(&*self.signer, &voter.enode_pubkey).is_err() {
            // The voter's key may have rotated under us; refresh it.
            let dos = if self.sync.is_synced() && vote.block_height > tip {
                warn!(voter = %vote.voter_outpoint, "invalid payment vote signature");
                20
            } else {
                debug!(voter = %vote.voter_outpoint, "unverifiable payment vote signature");
                0
            };
            self.registry.ask_for_entry(peer, &vote.voter_outpoint, now);
            return (false, dos);
        }

        // Rank gate: only the top ten at the ranking block may vote.
        // Non-enodes skip the check for past heights; the list may be
        // too far off to rank historic votes fairly.
        let is_enode = self.identity.get().is_some();
        if is_enode || vote.block_height >= tip {
            match self.registry.get_rank(
                &vote.voter_outpoint,
                vote.block_height.wrapping_sub(101),
                min_proto,
            ) {
                None => {
                    debug!(voter = %vote.voter_outpoint, "cannot rank voter");
                    return (false, 0);
                }
                Some(rank) if rank > PAYMENT_SIGNATURES_TOTAL => {
                    let dos = if rank > PAYMENT_SIGNATURES_TOTAL * 2 && vote.block_height > tip {
                        warn!(voter = %vote.voter_outpoint, rank, "voter far outside top ranks");
                        20
                    } else {
                        debug!(voter = %vote.voter_outpoint, rank, "voter not in top ranks");
                        0
                    };
                    return (false, dos);
                }
                _ => {}
            }
        }

        if self.add_payment_vote(&vote) {
            debug!(
                height = vote.block_height,
                voter = %vote.voter_outpoint,
                "payment vote accepted"
            );
            self.relay_vote(&vote);
            self.sync.added_payment_vote(now);
            (true, 0)
        } else {
            (false, 0)
        }
    }

    // ==================== producer voting ====================

    /// Vote for the winner of `block_height` if we are top-ranked.
    pub fn process_block(&self, block_height: u32, now: i64) -> bool {
        let Some(identity) = self.identity.get() else {
            return false;
        };
        // Picking a winner from an unsynced list is a coin toss.
        if !self.sync.is_list_synced() {
            return false;
        }

        let min_proto = min_payment_protocol(&self.sporks);
        let Some(rank) =
            self.registry
                .get_rank(&identity.outpoint, block_height.wrapping_sub(101), min_proto)
        else {
            debug!("own enode unknown in ranks");
            return false;
        };
        if rank > PAYMENT_SIGNATURES_TOTAL {
            debug!(rank, "not in the voting top ranks");
            return false;
        }

        info!(height = block_height, enode = %identity.outpoint, "selecting payment winner");
        let (winner, _count) = self.registry.next_enode_in_queue(block_height, true, now, &|mn| {
            self.is_scheduled(mn, block_height)
        });
        let Some(winner) = winner else {
            warn!(height = block_height, "failed to find an enode to pay");
            return false;
        };
        let payee = winner.payee_script();
        info!(height = block_height, winner = %winner.outpoint, "voting for payment winner");

        let mut vote = PaymentVote::new(identity.outpoint, block_height, payee);
        if vote.sign(&*self.signer, &identity.enode_key).is_err() {
            warn!("failed to sign payment vote");
            return false;
        }
        if self.add_payment_vote(&vote) {
            self.relay_vote(&vote);
            return true;
        }
        false
    }

    /// Whether an enode is already queued in the next few blocks.
    pub fn is_scheduled(&self, mn: &Enode, not_block_height: u32) -> bool {
        let Some(tip) = self.tip_height() else {
            return false;
        };
        let payee = mn.payee_script();
        let blocks = self.blocks.lock();
        for height in tip..=tip + SCHEDULE_LOOKAHEAD {
            if height == not_block_height {
                continue;
            }
            if let Some(payees) = blocks.get(&height) {
                if payees.best_payee().map(|p| p.script() == &payee).unwrap_or(false) {
                    return true;
                }
            }
        }
        false
    }

    // ==================== winners and validation ====================

    /// Best-voted payee for a height.
    pub fn get_block_payee(&self, block_height: u32) -> Option<PayScript> {
        self.blocks
            .lock()
            .get(&block_height)
            .and_then(|payees| payees.best_payee().map(|p| p.script().clone()))
    }

    /// Payee and amount for a locally produced block.
    ///
    /// Prefers the network's voted winner, falling back to the local
    /// election when no votes accumulated for the height.
    pub fn fill_block_payee(
        &self,
        block_height: u32,
        enode_payment: u64,
        now: i64,
    ) -> Option<(PayScript, u64)> {
        let payee = match self.get_block_payee(block_height) {
            Some(payee) => {
                info!(height = block_height, payment = enode_payment, "paying voted winner");
                payee
            }
            None => {
                let (winner, _) = self.registry.next_enode_in_queue(block_height, true, now, &|mn| {
                    self.is_scheduled(mn, block_height)
                });
                let winner = match winner {
                    Some(winner) => winner,
                    None => {
                        warn!(height = block_height, "failed to detect enode to pay");
                        return None;
                    }
                };
                info!(
                    height = block_height,
                    winner = %winner.outpoint,
                    payment = enode_payment,
                    "paying locally calculated winner"
                );
                winner.payee_script()
            }
        };
        Some((payee, enode_payment))
    }

    /// Validate a coinbase's enode output against the vote tally.
    pub fn is_transaction_valid(&self, coinbase: &CoinbaseOutputs, block_height: u32) -> bool {
        let payment = self
            .params
            .enode_payment(block_height, coinbase.total_value);
        self.blocks
            .lock()
            .get(&block_height)
            .map(|payees| payees.is_transaction_valid(coinbase, payment))
            .unwrap_or(true)
    }

    /// Full coinbase payee check for block acceptance.
    pub fn is_block_payee_valid(&self, coinbase: &CoinbaseOutputs, block_height: u32) -> bool {
        if block_height < self.params.payments_start_height {
            return true;
        }
        if !self.sync.is_synced() {
            // No data to check against; accept the longest chain.
            debug!(height = block_height, "not synced, skipping payee checks");
            return true;
        }
        if self.is_transaction_valid(coinbase, block_height) {
            return true;
        }
        if self.sporks.is_active(SporkId::PaymentEnforcement) {
            return false;
        }
        warn!(
            height = block_height,
            "invalid enode payment accepted, enforcement is disabled"
        );
        true
    }

    /// Validate the coinbase's created value against the block reward.
    ///
    /// Superblock payments are permanently out; the check never allows
    /// more than the plain reward, and the reason string is always
    /// populated on failure.
    pub fn is_block_value_valid(
        &self,
        coinbase_total: u64,
        block_height: u32,
        block_reward: u64,
    ) -> (bool, String) {
        if coinbase_total <= block_reward {
            return (true, String::new());
        }
        let reason = if !self.sync.is_synced() {
            format!(
                "coinbase pays too much at height {block_height} \
                 (actual={coinbase_total} vs limit={block_reward}), \
                 only regular blocks are allowed at this height"
            )
        } else if self.sporks.is_active(SporkId::Superblocks) {
            format!(
                "coinbase pays too much at height {block_height} \
                 (actual={coinbase_total} vs limit={block_reward}), \
                 no superblock data to justify it"
            )
        } else {
            format!(
                "coinbase pays too much at height {block_height} \
                 (actual={coinbase_total} vs limit={block_reward}), \
                 superblocks are disabled"
            )
        };
        (false, reason)
    }

    /// Status string of the payees recorded for a height.
    pub fn required_payments_string(&self, block_height: u32) -> String {
        self.blocks
            .lock()
            .get(&block_height)
            .map(|payees| payees.required_payments_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    // ==================== sync serving and backfill ====================

    /// Ask a peer for the winners list.
    pub fn ask_winners(&self, peer: &PeerId) {
        let mut payload = Vec::with_capacity(4);
        payload.extend_from_slice(&(self.storage_limit() as i32).to_le_bytes());
        self.net.send(peer, commands::MNPAYMENTSYNC, payload);
    }

    /// Serve a peer's winners-sync request; returns `(ok, dos)`.
    pub fn handle_payment_sync(&self, peer: &PeerId, now: i64) -> (bool, u32) {
        if !self.sync.is_synced() {
            return (false, 0);
        }
        {
            let mut asked = self.sync_asked.lock();
            asked.retain(|_, at| *at >= now);
            if asked.contains_key(&peer.addr) {
                warn!(peer = %peer.addr, "peer re-asked for payment sync too soon");
                return (false, 20);
            }
            asked.insert(peer.addr, now + DSEG_UPDATE_SECONDS);
        }

        let Some(tip) = self.tip_height() else {
            return (false, 0);
        };
        let mut sent = 0;
        {
            let blocks = self.blocks.lock();
            for height in tip..tip + VOTE_FUTURE_LIMIT {
                let Some(payees) = blocks.get(&height) else {
                    continue;
                };
                for payee in &payees.payees {
                    for hash in payee.vote_hashes() {
                        if !self.has_verified_payment_vote(hash) {
                            continue;
                        }
                        self.net.push_inventory(peer, inv::PAYMENT_VOTE, *hash);
                        sent += 1;
                    }
                }
            }
        }
        let status = SyncStatusCount {
            item_id: sync_items::WINNERS,
            count: sent,
        };
        self.net
            .send(peer, commands::SYNCSTATUSCOUNT, status.to_bytes());
        info!(peer = %peer.addr, sent, "served payment votes");
        (true, 0)
    }

    /// Ask one peer for payment data on every height we know too
    /// little about, batched to inventory-size limits.
    pub fn request_low_data_payment_blocks(&self, peer: &PeerId) {
        let Some(tip) = self.tip_height() else { return };
        let limit = self.storage_limit() as u32;

        let mut to_fetch: Vec<(u32, Hash256)> = Vec::new();

        // Heights we have nothing at all for.
        let unknown_heights: Vec<u32> = {
            let blocks = self.blocks.lock();
            let mut missing = Vec::new();
            let mut height = tip;
            while tip - height < limit {
                if !blocks.contains_key(&height) {
                    missing.push(height);
                }
                if height == 0 {
                    break;
                }
                height -= 1;
            }
            missing
        };
        for height in unknown_heights {
            if let Ok(hash) = self.chain.block_hash_at(height) {
                to_fetch.push((inv::PAYMENT_BLOCK, hash));
                if to_fetch.len() == MAX_INV_SZ {
                    debug!(peer = %peer.addr, count = to_fetch.len(), "requesting payment blocks");
                    self.net.request_data(peer, std::mem::take(&mut to_fetch));
                }
            }
        }

        // Heights with too few votes for a clear winner.
        let average = (PAYMENT_SIGNATURES_TOTAL + PAYMENT_SIGNATURES_REQUIRED) / 2;
        let low_heights: Vec<u32> = {
            let blocks = self.blocks.lock();
            blocks
                .iter()
                .filter(|(_, payees)| {
                    let has_winner = payees
                        .payees
                        .iter()
                        .any(|p| p.vote_count() >= PAYMENT_SIGNATURES_REQUIRED);
                    !has_winner && payees.total_votes() < average
                })
                .map(|(height, _)| *height)
                .collect()
        };
        for height in low_heights {
            if let Ok(hash) = self.chain.block_hash_at(height) {
                to_fetch.push((inv::PAYMENT_BLOCK, hash));
            }
            if to_fetch.len() == MAX_INV_SZ {
                debug!(peer = %peer.addr, count = to_fetch.len(), "requesting payment blocks");
                self.net.request_data(peer, std::mem::take(&mut to_fetch));
            }
        }

        if !to_fetch.is_empty() {
            debug!(peer = %peer.addr, count = to_fetch.len(), "requesting payment blocks");
            self.net.request_data(peer, to_fetch);
        }
    }

    // ==================== housekeeping ====================

    /// Prune votes that fell out of the storage window.
    ///
    /// Uses `try_lock` so a busy tip notification skips a round instead
    /// of stalling it.
    pub fn check_and_remove(&self) {
        let Some(tip) = self.tip_height() else { return };
        let Some(mut blocks) = self.blocks.try_lock() else {
            debug!("vote store busy, skipping payment housekeeping");
            return;
        };
        let Some(mut votes) = self.votes.try_lock() else {
            debug!("vote store busy, skipping payment housekeeping");
            return;
        };

        let limit = self.storage_limit() as u32;
        let before = votes.by_hash.len();
        votes.by_hash.retain(|_, vote| {
            let keep = tip.saturating_sub(vote.block_height) <= limit;
            if !keep {
                blocks.remove(&vote.block_height);
            }
            keep
        });
        if before != votes.by_hash.len() {
            debug!(
                removed = before - votes.by_hash.len(),
                votes = votes.by_hash.len(),
                blocks = blocks.len(),
                "pruned old payment votes"
            );
        }
    }

    /// Refresh every enode's last-paid data by scanning recent
    /// coinbases against the vote tallies.
    pub fn update_last_paid(&self) {
        let Some(tip) = self.tip_height() else { return };

        let first_run = self.first_last_paid_run.load(Ordering::Relaxed);
        let max_scan = if first_run || self.identity.get().is_none() {
            self.storage_limit() as u32
        } else {
            LAST_PAID_SCAN_BLOCKS
        };

        for mn in self.registry.all() {
            let payee = mn.payee_script();
            let mut height = tip;
            let mut scanned = 0u32;
            while height > mn.block_last_paid && scanned < max_scan {
                let has_votes = self
                    .blocks
                    .lock()
                    .get(&height)
                    .map(|payees| payees.has_payee_with_votes(&payee, 2))
                    .unwrap_or(false);
                if has_votes {
                    if let Ok(coinbase) = self.chain.coinbase_at(height) {
                        let payment = self.params.enode_payment(height, coinbase.total_value);
                        if coinbase.pays(&payee, payment) {
                            let time = self.chain.block_time_at(height).unwrap_or(0);
                            self.registry.set_last_paid(&mn.outpoint, height, time);
                            debug!(enode = %mn.outpoint, height, "found last payment");
                            break;
                        }
                    }
                }
                if height == 0 {
                    break;
                }
                height -= 1;
                scanned += 1;
            }
        }

        // Every run is a first run until the winners list is complete.
        self.first_last_paid_run
            .store(!self.sync.is_winners_synced(), Ordering::Relaxed);
    }

    /// A new chain tip was connected.
    pub fn updated_block_tip(&self, height: u32, now: i64) {
        *self.tip.write() = Some(height);
        debug!(height, "payment engine saw new tip");
        self.process_block(height + VOTE_TARGET_OFFSET, now);
    }

    /// Drop all vote state.
    pub fn clear(&self) {
        self.blocks.lock().clear();
        let mut votes = self.votes.lock();
        votes.by_hash.clear();
        votes.last_votes.clear();
    }

    // ==================== cache plumbing ====================

    pub(crate) fn snapshot_votes(&self) -> Vec<(Hash256, PaymentVote)> {
        self.votes
            .lock()
            .by_hash
            .iter()
            .map(|(hash, vote)| (*hash, vote.clone()))
            .collect()
    }

    pub(crate) fn snapshot_blocks(&self) -> Vec<(u32, BlockPayees)> {
        self.blocks
            .lock()
            .iter()
            .map(|(height, payees)| (*height, payees.clone()))
            .collect()
    }

    pub(crate) fn snapshot_last_votes(&self) -> Vec<(Outpoint, u32)> {
        self.votes
            .lock()
            .last_votes
            .iter()
            .map(|(outpoint, height)| (*outpoint, *height))
            .collect()
    }

    pub(crate) fn restore(
        &self,
        votes: Vec<(Hash256, PaymentVote)>,
        blocks: Vec<(u32, BlockPayees)>,
        last_votes: Vec<(Outpoint, u32)>,
    ) {
        let mut block_store = self.blocks.lock();
        let mut vote_store = self.votes.lock();
        *block_store = blocks.into_iter().collect();
        vote_store.by_hash = votes.into_iter().collect();
        vote_store.last_votes = last_votes.into_iter().collect();
    }
}
