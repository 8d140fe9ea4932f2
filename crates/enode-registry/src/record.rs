//! One enode's record and its lifecycle state machine.

use enode_messages::{Announce, Ping};
use enode_types::{
    score_distance, Hash256, NetAddr, Outpoint, PayScript, PubKey, CHECK_SECONDS,
    EXPIRATION_SECONDS, MIN_PING_SECONDS, NEW_START_REQUIRED_SECONDS, POSE_BAN_MAX_SCORE,
    WATCHDOG_MAX_SECONDS,
};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of a registered enode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnodeState {
    /// Announced but still inside the ping grace period.
    PreEnabled,
    /// Fully live and eligible for payment.
    Enabled,
    /// No ping within the expiration window.
    Expired,
    /// Collateral no longer unspent.
    OutpointSpent,
    /// Protocol below the payment minimum.
    UpdateRequired,
    /// Global watchdog active and this node's vote is stale.
    WatchdogExpired,
    /// Silent long enough that only a fresh announce revives it.
    NewStartRequired,
    /// Banned by proof-of-service score.
    PoSeBan,
}

impl EnodeState {
    /// Stable uppercase name used in logs and status strings.
    pub fn name(self) -> &'static str {
        match self {
            EnodeState::PreEnabled => "PRE_ENABLED",
            EnodeState::Enabled => "ENABLED",
            EnodeState::Expired => "EXPIRED",
            EnodeState::OutpointSpent => "OUTPOINT_SPENT",
            EnodeState::UpdateRequired => "UPDATE_REQUIRED",
            EnodeState::WatchdogExpired => "WATCHDOG_EXPIRED",
            EnodeState::NewStartRequired => "NEW_START_REQUIRED",
            EnodeState::PoSeBan => "POSE_BAN",
        }
    }

    /// States a remote-started node may adopt its record from.
    pub fn valid_for_auto_start(self) -> bool {
        matches!(
            self,
            EnodeState::Enabled
                | EnodeState::PreEnabled
                | EnodeState::Expired
                | EnodeState::WatchdogExpired
        )
    }
}

impl std::fmt::Display for EnodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Environment a lifecycle check runs against. Everything the ladder
/// needs is captured up front so the record itself stays lock-free and
/// the transitions are unit-testable with plain values.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext {
    /// Adjusted wall clock.
    pub now: i64,
    /// Current tip; `None` when chain state is unavailable.
    pub tip_height: Option<u32>,
    /// True if the collateral is no longer in the UTXO set.
    pub outpoint_spent: bool,
    /// Registry size, used for the PoSe ban duration.
    pub registry_size: usize,
    /// Watchdog signal (fully synced and globally fresh).
    pub watchdog_active: bool,
    /// Whether the initial list sync is complete.
    pub list_synced: bool,
    /// This record belongs to the local node.
    pub own_node: bool,
    /// Own node announced an outdated protocol.
    pub own_protocol_outdated: bool,
    /// Minimum protocol for payments right now.
    pub min_payment_protocol: i32,
    /// Skip the 5 s throttle.
    pub force: bool,
}

/// A registered enode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enode {
    /// Collateral outpoint; unique registry key.
    pub outpoint: Outpoint,
    /// Advertised endpoint.
    pub addr: NetAddr,
    /// Collateral-controlling key.
    pub collateral_pubkey: PubKey,
    /// Operating key.
    pub enode_pubkey: PubKey,
    /// Latest accepted ping.
    pub last_ping: Ping,
    /// Announce signature.
    pub sig: Vec<u8>,
    /// Announce timestamp.
    pub sig_time: i64,
    /// Mixing-queue counter slot, kept for cache compatibility.
    pub last_dsq: i64,
    /// Lifecycle check throttle stamp.
    pub time_last_checked: i64,
    /// Wall-clock time of the last observed payout.
    pub time_last_paid: i64,
    /// Last watchdog vote for this record.
    pub time_last_watchdog_vote: i64,
    /// Current lifecycle state.
    pub state: EnodeState,
    /// First-seen height of the collateral; 0 until resolved.
    pub collateral_block_cache: u32,
    /// Height of the last observed payout.
    pub block_last_paid: u32,
    /// Announced protocol version.
    pub protocol_version: i32,
    /// PoSe score in [-5, +5]; -5 means verified.
    pub pose_ban_score: i32,
    /// Banned until this height when state is `PoSeBan`.
    pub pose_ban_height: u32,
}

impl Enode {
    /// Build a record from a validated announcement.
    pub fn from_announce(mnb: &Announce) -> Self {
        Self {
            outpoint: mnb.outpoint,
            addr: mnb.addr,
            collateral_pubkey: mnb.collateral_pubkey,
            enode_pubkey: mnb.enode_pubkey,
            last_ping: mnb.last_ping.clone(),
            sig: mnb.sig.clone(),
            sig_time: mnb.sig_time,
            last_dsq: 0,
            time_last_checked: 0,
            time_last_paid: 0,
            time_last_watchdog_vote: mnb.sig_time,
            state: EnodeState::Enabled,
            collateral_block_cache: 0,
            block_last_paid: 0,
            protocol_version: mnb.protocol_version,
            pose_ban_score: 0,
            pose_ban_height: 0,
        }
    }

    /// Rebuild the announce this record was born from.
    pub fn to_announce(&self) -> Announce {
        Announce {
            outpoint: self.outpoint,
            addr: self.addr,
            collateral_pubkey: self.collateral_pubkey,
            enode_pubkey: self.enode_pubkey,
            sig: self.sig.clone(),
            sig_time: self.sig_time,
            protocol_version: self.protocol_version,
            last_ping: self.last_ping.clone(),
        }
    }

    /// Script this enode gets paid to.
    pub fn payee_script(&self) -> PayScript {
        PayScript::pay_to_pubkey(&self.collateral_pubkey)
    }

    /// Election score against a block hash.
    pub fn calculate_score(&self, block_hash: &Hash256) -> BigUint {
        score_distance(&self.outpoint, block_hash)
    }

    /// Whether the announce is younger than `seconds`.
    pub fn is_broadcast_within(&self, seconds: i64, now: i64) -> bool {
        now - self.sig_time < seconds
    }

    /// Whether the last ping is younger than `seconds` at `at`.
    pub fn is_pinged_within(&self, seconds: i64, at: i64) -> bool {
        if self.last_ping.is_empty() {
            return false;
        }
        at - self.last_ping.sig_time < seconds
    }

    pub fn is_enabled(&self) -> bool {
        self.state == EnodeState::Enabled
    }

    pub fn is_pre_enabled(&self) -> bool {
        self.state == EnodeState::PreEnabled
    }

    pub fn is_pose_banned(&self) -> bool {
        self.state == EnodeState::PoSeBan
    }

    /// Verified by PoSe; driven by the score, not the state.
    pub fn is_pose_verified(&self) -> bool {
        self.pose_ban_score <= -POSE_BAN_MAX_SCORE
    }

    pub fn is_new_start_required(&self) -> bool {
        self.state == EnodeState::NewStartRequired
    }

    pub fn is_update_required(&self) -> bool {
        self.state == EnodeState::UpdateRequired
    }

    pub fn is_outpoint_spent(&self) -> bool {
        self.state == EnodeState::OutpointSpent
    }

    /// Only `Enabled` records get scheduled for payment.
    pub fn is_valid_for_payment(&self) -> bool {
        self.state == EnodeState::Enabled
    }

    /// Bump the PoSe score towards a ban.
    pub fn increase_pose_ban_score(&mut self) {
        if self.pose_ban_score < POSE_BAN_MAX_SCORE {
            self.pose_ban_score += 1;
        }
    }

    /// Lower the PoSe score towards verified.
    pub fn decrease_pose_ban_score(&mut self) {
        if self.pose_ban_score > -POSE_BAN_MAX_SCORE {
            self.pose_ban_score -= 1;
        }
    }

    /// Stamp a watchdog vote.
    pub fn update_watchdog_vote_time(&mut self, now: i64) {
        self.time_last_watchdog_vote = now;
    }

    /// Collateral age in blocks at `tip`, `None` until the funding
    /// height is cached.
    pub fn collateral_age(&self, tip: u32) -> Option<u32> {
        if self.collateral_block_cache == 0 {
            return None;
        }
        Some(tip.saturating_sub(self.collateral_block_cache))
    }

    /// Overwrite mutable identity fields from a newer broadcast.
    ///
    /// The caller has already validated the broadcast; this refuses
    /// only the stale case (`sig_time` not newer, without the recovery
    /// override).
    pub fn update_from_announce(&mut self, mnb: &Announce, recovery: bool) -> bool {
        if mnb.sig_time <= self.sig_time && !recovery {
            return false;
        }
        self.enode_pubkey = mnb.enode_pubkey;
        self.sig_time = mnb.sig_time;
        self.sig = mnb.sig.clone();
        self.protocol_version = mnb.protocol_version;
        self.addr = mnb.addr;
        self.pose_ban_score = 0;
        self.pose_ban_height = 0;
        self.time_last_checked = 0;
        if !mnb.last_ping.is_empty() {
            self.last_ping = mnb.last_ping.clone();
        }
        true
    }

    /// Run the lifecycle ladder.
    pub fn check(&mut self, ctx: &CheckContext) {
        if self.is_outpoint_spent() {
            return;
        }
        if !ctx.force && ctx.now - self.time_last_checked < CHECK_SECONDS {
            return;
        }
        self.time_last_checked = ctx.now;

        let tip = match ctx.tip_height {
            Some(tip) => tip,
            // Chain state unavailable; try again next round.
            None => return,
        };

        if ctx.outpoint_spent {
            self.transition(EnodeState::OutpointSpent);
            return;
        }

        if self.is_pose_banned() {
            if tip < self.pose_ban_height {
                return;
            }
            debug!(enode = %self.outpoint, "unbanned, back in list");
            self.decrease_pose_ban_score();
        } else if self.pose_ban_score >= POSE_BAN_MAX_SCORE {
            self.pose_ban_height = tip + ctx.registry_size as u32;
            self.transition(EnodeState::PoSeBan);
            debug!(
                enode = %self.outpoint,
                until = self.pose_ban_height,
                "banned by PoSe score"
            );
            return;
        }

        let requires_update =
            self.protocol_version < ctx.min_payment_protocol || ctx.own_protocol_outdated;
        if requires_update {
            self.transition(EnodeState::UpdateRequired);
            return;
        }

        // Keep pre-sync records around so they get a chance to ping.
        let wait_for_ping = !ctx.list_synced && !self.is_pinged_within(MIN_PING_SECONDS, ctx.now);
        if wait_for_ping && !ctx.own_node {
            if matches!(
                self.state,
                EnodeState::Expired | EnodeState::WatchdogExpired | EnodeState::NewStartRequired
            ) {
                return;
            }
        }

        if !wait_for_ping || ctx.own_node {
            if !self.is_pinged_within(NEW_START_REQUIRED_SECONDS, ctx.now) {
                self.transition(EnodeState::NewStartRequired);
                return;
            }

            let watchdog_expired = ctx.watchdog_active
                && ctx.now - self.time_last_watchdog_vote > WATCHDOG_MAX_SECONDS;
            if watchdog_expired {
                self.transition(EnodeState::WatchdogExpired);
                return;
            }

            if !self.is_pinged_within(EXPIRATION_SECONDS, ctx.now) {
                self.transition(EnodeState::Expired);
                return;
            }
        }

        if self.last_ping.sig_time - self.sig_time < MIN_PING_SECONDS {
            self.transition(EnodeState::PreEnabled);
            return;
        }

        self.transition(EnodeState::Enabled);
    }

    fn transition(&mut self, next: EnodeState) {
        if self.state != next {
            debug!(enode = %self.outpoint, from = %self.state, to = %next, "state change");
            self.state = next;
        }
    }
}
