//! Deterministic ranking and payment-queue selection.
//!
//! Ranks are compact-encoded scores against the block hash at a given
//! height, sorted descending with the outpoint as tiebreak, so every
//! node that agrees on the registry snapshot agrees on the ordering.

use crate::record::Enode;
use crate::registry::EnodeRegistry;
use enode_chain::min_payment_protocol;
use enode_types::{compact_from_score, Outpoint};
use tracing::{debug, trace};

/// Seconds per expected block; a new enode waits one full rotation.
const SECONDS_PER_ROTATION_SLOT: i64 = 156;

impl EnodeRegistry {
    /// All enabled enodes ranked at `height` (rank is 1-based).
    pub fn get_ranks(&self, height: u32, min_protocol: i32) -> Vec<(usize, Enode)> {
        let Ok(block_hash) = self.chain.block_hash_at(height) else {
            return Vec::new();
        };

        let mut scored: Vec<(u32, Enode)> = self
            .all()
            .into_iter()
            .filter(|mn| mn.protocol_version >= min_protocol && mn.is_enabled())
            .map(|mn| (compact_from_score(&mn.calculate_score(&block_hash)), mn))
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.outpoint.cmp(&a.1.outpoint)));

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (_, mn))| (i + 1, mn))
            .collect()
    }

    /// Rank of one enode at `height`; `None` when unknown or not
    /// eligible.
    pub fn get_rank(&self, outpoint: &Outpoint, height: u32, min_protocol: i32) -> Option<usize> {
        let Ok(block_hash) = self.chain.block_hash_at(height) else {
            return None;
        };

        let mut scored: Vec<(u32, Outpoint)> = self
            .all()
            .into_iter()
            .filter(|mn| mn.protocol_version >= min_protocol && mn.is_valid_for_payment())
            .map(|mn| (compact_from_score(&mn.calculate_score(&block_hash)), mn.outpoint))
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        scored
            .iter()
            .position(|(_, op)| op == outpoint)
            .map(|pos| pos + 1)
    }

    /// The enode at a given rank, if the list reaches that deep.
    pub fn get_by_rank(&self, rank: usize, height: u32, min_protocol: i32) -> Option<Enode> {
        self.get_ranks(height, min_protocol)
            .into_iter()
            .find(|(r, _)| *r == rank)
            .map(|(_, mn)| mn)
    }

    /// Deterministically select the next enode to pay at `height`.
    ///
    /// Filters by eligibility, sorts by longest-unpaid, then picks the
    /// highest score inside the oldest tenth of the network. Returns
    /// the winner and how many enodes qualified. `is_scheduled` is the
    /// payment engine's look-ahead so a node already queued in the next
    /// few blocks is skipped.
    pub fn next_enode_in_queue(
        &self,
        height: u32,
        filter_sig_time: bool,
        now: i64,
        is_scheduled: &dyn Fn(&Enode) -> bool,
    ) -> (Option<Enode>, usize) {
        let enode_count = self.count_enabled(None);
        self.ensure_collateral_heights();
        let tip = self.chain.tip_height();

        let mut candidates: Vec<(u32, Enode)> = Vec::new();
        for mn in self.all() {
            if let Some(reason) =
                self.not_qualify_reason(&mn, filter_sig_time, enode_count, now, tip, is_scheduled)
            {
                trace!(enode = %mn.outpoint, reason, "not qualified for payment");
                continue;
            }
            candidates.push((mn.block_last_paid, mn));
        }
        let qualified = candidates.len();

        // While the network upgrades, do not punish recent restarts.
        if filter_sig_time && qualified < enode_count / 3 {
            return self.next_enode_in_queue(height, false, now, is_scheduled);
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.outpoint.cmp(&b.1.outpoint)));

        let Ok(block_hash) = self.chain.block_hash_at(height.wrapping_sub(101)) else {
            debug!(height, "no block hash for payment selection");
            return (None, qualified);
        };

        // Pay the best-scoring node among the tenth longest unpaid.
        // Candidates tied with the cohort boundary stay in; otherwise
        // the score would never get a say between equally-old nodes.
        let tenth = (enode_count / 10).max(1);
        let mut best: Option<Enode> = None;
        let mut best_score = Default::default();
        let mut boundary: Option<u32> = None;
        for (idx, (last_paid, mn)) in candidates.iter().enumerate() {
            if idx >= tenth && Some(*last_paid) != boundary {
                break;
            }
            let score = mn.calculate_score(&block_hash);
            if best.is_none() || score > best_score {
                best_score = score;
                best = Some(mn.clone());
            }
            boundary = Some(*last_paid);
        }
        (best, qualified)
    }

    /// Why an enode cannot be scheduled, or `None` when it qualifies.
    fn not_qualify_reason(
        &self,
        mn: &Enode,
        filter_sig_time: bool,
        enode_count: usize,
        now: i64,
        tip: Option<u32>,
        is_scheduled: &dyn Fn(&Enode) -> bool,
    ) -> Option<String> {
        if !mn.is_valid_for_payment() {
            return Some("not valid for payment".into());
        }
        if mn.protocol_version < min_payment_protocol(&self.sporks) {
            return Some(format!(
                "invalid protocol version {}",
                mn.protocol_version
            ));
        }
        if is_scheduled(mn) {
            return Some("already scheduled".into());
        }
        if filter_sig_time
            && mn.sig_time + enode_count as i64 * SECONDS_PER_ROTATION_SLOT > now
        {
            return Some(format!("too new, sig_time={}", mn.sig_time));
        }
        let age = tip.and_then(|tip| mn.collateral_age(tip));
        match age {
            Some(age) if age as usize >= enode_count => None,
            Some(age) => Some(format!(
                "collateral age {age} below enode count {enode_count}"
            )),
            None => Some("collateral age unknown".into()),
        }
    }
}
