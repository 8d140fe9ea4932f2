//! The enode registry.
//!
//! Single owner of every [`Enode`] record. All lookups copy data out
//! under the registry lock; nothing outside this crate ever holds a
//! reference into the record vector. Chain state is always read before
//! the registry lock is taken.

use crate::index::DenseIndex;
use crate::record::{CheckContext, Enode, EnodeState};
use dashmap::DashMap;
use enode_chain::{
    min_payment_protocol, Chain, ChainError, Net, PeerId, SharedIdentity, Signer, SporkSet,
};
use enode_messages::{commands, encode_dseg, inv, sync_items, Announce, Ping, SyncStatusCount, Verify};
use enode_sync::SyncManager;
use enode_types::{
    params::PROTOCOL_VERSION, Hash256, NetAddr, NetworkParams, Outpoint, PayScript, PubKey,
    COLLATERAL_AMOUNT, DSEG_UPDATE_SECONDS, MIN_ANNOUNCE_SECONDS, MIN_PING_SECONDS,
    NEW_START_REQUIRED_SECONDS, POSE_BAN_MAX_SCORE, WATCHDOG_MAX_SECONDS,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Recovery quorum: how many peers get asked.
pub const RECOVERY_QUORUM_TOTAL: usize = 10;

/// Recovery quorum: good replies needed to reinstate.
pub const RECOVERY_QUORUM_REQUIRED: usize = 6;

/// Recovery rounds opened per housekeeping pass.
pub const RECOVERY_MAX_ASK_ENTRIES: usize = 10;

/// How long a recovery round waits for replies.
pub const RECOVERY_WAIT_SECONDS: i64 = 60;

/// Minimum delay before re-opening recovery for an outpoint.
pub const RECOVERY_RETRY_SECONDS: i64 = 3 * 60 * 60;

/// Verify records older than this many blocks are dropped.
pub const MAX_POSE_BLOCKS: u32 = 10;

/// Index rebuilds are at most this frequent.
const MIN_INDEX_REBUILD_SECONDS: i64 = 3600;

/// Index rebuild threshold.
const MAX_EXPECTED_INDEX_SIZE: usize = 30_000;

/// Cache-format version; a mismatch clears the cache on load.
pub const SERIALIZATION_VERSION: &str = "EnodeRegistry-Version-4";

/// Events published by the registry for other components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A valid announcement matching the local enode key was accepted.
    SelfAnnounceSeen,
}

pub(crate) struct Inner {
    pub enodes: Vec<Enode>,
    pub asked_us_for_list: HashMap<NetAddr, i64>,
    pub we_asked_for_list: HashMap<NetAddr, i64>,
    pub we_asked_for_entry: HashMap<Outpoint, HashMap<NetAddr, i64>>,
    pub we_asked_for_verification: HashMap<NetAddr, Verify>,
    pub fulfilled_requests: HashMap<(NetAddr, &'static str), i64>,
    pub recovery_requests: HashMap<Hash256, (i64, HashSet<NetAddr>)>,
    pub recovery_good_replies: HashMap<Hash256, Vec<Announce>>,
    pub scheduled_recovery_connections: Vec<(NetAddr, Hash256)>,
    pub seen_announces: HashMap<Hash256, (i64, Announce)>,
    pub index: DenseIndex,
    pub old_index: DenseIndex,
    pub index_rebuilt: bool,
    pub last_index_rebuild: i64,
    pub last_watchdog_vote_time: i64,
    pub dsq_count: i64,
    pub enodes_added: bool,
    pub enodes_removed: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            enodes: Vec::new(),
            asked_us_for_list: HashMap::new(),
            we_asked_for_list: HashMap::new(),
            we_asked_for_entry: HashMap::new(),
            we_asked_for_verification: HashMap::new(),
            fulfilled_requests: HashMap::new(),
            recovery_requests: HashMap::new(),
            recovery_good_replies: HashMap::new(),
            scheduled_recovery_connections: Vec::new(),
            seen_announces: HashMap::new(),
            index: DenseIndex::new(),
            old_index: DenseIndex::new(),
            index_rebuilt: false,
            last_index_rebuild: 0,
            last_watchdog_vote_time: 0,
            dsq_count: 0,
            enodes_added: false,
            enodes_removed: false,
        }
    }
}

/// Concurrent registry of enodes.
pub struct EnodeRegistry {
    pub(crate) params: NetworkParams,
    pub(crate) chain: Arc<dyn Chain>,
    pub(crate) net: Arc<dyn Net>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) sporks: Arc<SporkSet>,
    pub(crate) sync: Arc<SyncManager>,
    pub(crate) identity: SharedIdentity,
    pub(crate) inner: RwLock<Inner>,
    pub(crate) seen_pings: DashMap<Hash256, Ping>,
    pub(crate) seen_verifies: DashMap<Hash256, Verify>,
    tip: RwLock<Option<u32>>,
    events: Mutex<Option<SyncSender<RegistryEvent>>>,
}

impl EnodeRegistry {
    /// Create an empty registry.
    pub fn new(
        params: NetworkParams,
        chain: Arc<dyn Chain>,
        net: Arc<dyn Net>,
        signer: Arc<dyn Signer>,
        sporks: Arc<SporkSet>,
        sync: Arc<SyncManager>,
        identity: SharedIdentity,
    ) -> Self {
        Self {
            params,
            chain,
            net,
            signer,
            sporks,
            sync,
            identity,
            inner: RwLock::new(Inner::default()),
            seen_pings: DashMap::new(),
            seen_verifies: DashMap::new(),
            tip: RwLock::new(None),
            events: Mutex::new(None),
        }
    }

    /// Install the bounded event channel consumed by activation.
    pub fn set_event_sender(&self, sender: SyncSender<RegistryEvent>) {
        *self.events.lock() = Some(sender);
    }

    fn publish(&self, event: RegistryEvent) {
        if let Some(sender) = self.events.lock().as_ref() {
            // A full channel only delays reactivation by one tick.
            let _ = sender.try_send(event);
        }
    }

    /// Network parameters in use.
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Last tip height this registry was told about.
    pub fn tip_height(&self) -> Option<u32> {
        *self.tip.read()
    }

    /// Number of registered enodes.
    pub fn size(&self) -> usize {
        self.inner.read().enodes.len()
    }

    /// True if the outpoint is registered.
    pub fn has(&self, outpoint: &Outpoint) -> bool {
        self.inner
            .read()
            .enodes
            .iter()
            .any(|mn| mn.outpoint == *outpoint)
    }

    /// Copy of the record for an outpoint.
    pub fn get(&self, outpoint: &Outpoint) -> Option<Enode> {
        self.inner
            .read()
            .enodes
            .iter()
            .find(|mn| mn.outpoint == *outpoint)
            .cloned()
    }

    /// Copy of the record for an operating key.
    pub fn get_by_enode_pubkey(&self, pubkey: &PubKey) -> Option<Enode> {
        self.inner
            .read()
            .enodes
            .iter()
            .find(|mn| mn.enode_pubkey == *pubkey)
            .cloned()
    }

    /// Copy of the record paying to `script`.
    pub fn get_by_payee(&self, script: &PayScript) -> Option<Enode> {
        self.inner
            .read()
            .enodes
            .iter()
            .find(|mn| mn.payee_script() == *script)
            .cloned()
    }

    /// Snapshot of all records.
    pub fn all(&self) -> Vec<Enode> {
        self.inner.read().enodes.clone()
    }

    /// Count records at or above a protocol version (payment minimum
    /// when `None`).
    pub fn count_enodes(&self, min_protocol: Option<i32>) -> usize {
        let min = min_protocol.unwrap_or_else(|| min_payment_protocol(&self.sporks));
        self.inner
            .read()
            .enodes
            .iter()
            .filter(|mn| mn.protocol_version >= min)
            .count()
    }

    /// Count enabled records at or above a protocol version.
    pub fn count_enabled(&self, min_protocol: Option<i32>) -> usize {
        let min = min_protocol.unwrap_or_else(|| min_payment_protocol(&self.sporks));
        self.inner
            .read()
            .enodes
            .iter()
            .filter(|mn| mn.protocol_version >= min && mn.is_enabled())
            .count()
    }

    /// Dense index of an outpoint.
    pub fn dense_index_of(&self, outpoint: &Outpoint) -> Option<usize> {
        self.inner.read().index.get_index(outpoint)
    }

    /// Outpoint at a dense index.
    pub fn outpoint_at_index(&self, index: usize) -> Option<Outpoint> {
        self.inner.read().index.get_outpoint(index)
    }

    /// Index of an outpoint in the pre-rebuild index.
    pub fn old_index_of(&self, outpoint: &Outpoint) -> Option<usize> {
        self.inner.read().old_index.get_index(outpoint)
    }

    /// Outpoint at a pre-rebuild index value.
    pub fn outpoint_at_old_index(&self, index: usize) -> Option<Outpoint> {
        self.inner.read().old_index.get_outpoint(index)
    }

    /// Whether the index was rebuilt since the last clear.
    pub fn index_rebuilt(&self) -> bool {
        self.inner.read().index_rebuilt
    }

    /// Forget the pre-rebuild index.
    pub fn clear_old_index(&self) {
        let mut inner = self.inner.write();
        inner.old_index.clear();
        inner.index_rebuilt = false;
    }

    /// Report and reset the added/removed flags, for components that
    /// recompute caches when membership changes.
    pub fn notify_enode_updates(&self) -> (bool, bool) {
        let mut inner = self.inner.write();
        let flags = (inner.enodes_added, inner.enodes_removed);
        inner.enodes_added = false;
        inner.enodes_removed = false;
        flags
    }

    /// Append a record if its outpoint is new. Returns whether added.
    pub fn add(&self, mn: Enode) -> bool {
        let mut inner = self.inner.write();
        if inner.enodes.iter().any(|m| m.outpoint == mn.outpoint) {
            return false;
        }
        debug!(enode = %mn.outpoint, addr = %mn.addr, total = inner.enodes.len() + 1, "adding enode");
        inner.index.insert(mn.outpoint);
        inner.enodes.push(mn);
        inner.enodes_added = true;
        true
    }

    /// Global mixing-queue counter.
    pub fn dsq_count(&self) -> i64 {
        self.inner.read().dsq_count
    }

    /// Bump the global mixing-queue counter, returning the new value.
    pub fn next_dsq_count(&self) -> i64 {
        let mut inner = self.inner.write();
        inner.dsq_count += 1;
        inner.dsq_count
    }

    // ==================== asks and DSEG ====================

    /// Ask a peer for one enode entry, rate-limited per (outpoint, peer).
    pub fn ask_for_entry(&self, peer: &PeerId, outpoint: &Outpoint, now: i64) {
        {
            let mut inner = self.inner.write();
            let per_peer = inner.we_asked_for_entry.entry(*outpoint).or_default();
            if let Some(retry_at) = per_peer.get(&peer.addr) {
                if now < *retry_at {
                    // Asked recently; repeating would get us banned.
                    return;
                }
            }
            per_peer.insert(peer.addr, now + DSEG_UPDATE_SECONDS);
        }
        debug!(enode = %outpoint, peer = %peer.addr, "asking peer for enode entry");
        self.net.send(peer, commands::DSEG, encode_dseg(outpoint));
    }

    /// Ask a peer for the whole list, once per window.
    pub fn dseg_update(&self, peer: &PeerId, now: i64) {
        {
            let mut inner = self.inner.write();
            if self.params.network == enode_types::Network::Mainnet
                && !(peer.addr.is_rfc1918() || peer.addr.is_local())
            {
                if let Some(retry_at) = inner.we_asked_for_list.get(&peer.addr) {
                    if now < *retry_at {
                        debug!(peer = %peer.addr, "already asked for the list; skipping");
                        return;
                    }
                }
            }
            inner
                .we_asked_for_list
                .insert(peer.addr, now + DSEG_UPDATE_SECONDS);
        }
        self.net
            .send(peer, commands::DSEG, encode_dseg(&Outpoint::default()));
        debug!(peer = %peer.addr, "asked peer for the enode list");
    }

    /// Serve an inbound `DSEG` request.
    pub fn handle_dseg(&self, peer: &PeerId, outpoint: Outpoint, now: i64) {
        // Heavy; only answer once our own data is complete.
        if !self.sync.is_synced() {
            return;
        }

        let whole_list = outpoint.is_null();
        if whole_list {
            let is_local = peer.addr.is_rfc1918() || peer.addr.is_local();
            if !is_local && self.params.network == enode_types::Network::Mainnet {
                let mut inner = self.inner.write();
                if let Some(retry_at) = inner.asked_us_for_list.get(&peer.addr) {
                    if now < *retry_at {
                        warn!(peer = %peer.addr, "peer re-asked for the list too soon");
                        self.net.misbehaving(peer, 34);
                        return;
                    }
                }
                inner
                    .asked_us_for_list
                    .insert(peer.addr, now + DSEG_UPDATE_SECONDS);
            }
        }

        let mut sent = 0;
        let mut found = false;
        {
            let mut inner = self.inner.write();
            let enodes = inner.enodes.clone();
            for mn in &enodes {
                if !whole_list && mn.outpoint != outpoint {
                    continue;
                }
                if mn.addr.is_rfc1918() || mn.addr.is_local() {
                    continue;
                }
                if mn.is_update_required() {
                    continue;
                }
                let mnb = mn.to_announce();
                let hash = mnb.hash();
                self.net.push_inventory(peer, inv::ANNOUNCE, hash);
                self.net
                    .push_inventory(peer, inv::PING, mn.last_ping.hash());
                sent += 1;
                inner
                    .seen_announces
                    .entry(hash)
                    .or_insert_with(|| (now, mnb));
                self.seen_pings
                    .entry(mn.last_ping.hash())
                    .or_insert_with(|| mn.last_ping.clone());
                if !whole_list {
                    found = true;
                    break;
                }
            }
        }

        if whole_list {
            let status = SyncStatusCount {
                item_id: sync_items::LIST,
                count: sent,
            };
            self.net
                .send(peer, commands::SYNCSTATUSCOUNT, status.to_bytes());
            debug!(peer = %peer.addr, sent, "served enode list");
        } else if !found {
            debug!(peer = %peer.addr, enode = %outpoint, "no matching entry for dseg");
        }
    }

    // ==================== announce pipeline ====================

    /// Full validation pipeline for an inbound announce.
    ///
    /// Returns `(accepted, dos_score)`; the dispatch layer applies the
    /// score to the sending peer.
    pub fn check_and_update(
        &self,
        from: Option<&PeerId>,
        mnb: &Announce,
        recovery: bool,
        now: i64,
    ) -> (bool, u32) {
        let hash = mnb.hash();

        // Duplicate-seen short-circuit, plus recovery reply capture.
        {
            let mut inner = self.inner.write();
            if let Some((first_seen, stored)) = inner.seen_announces.get(&hash).cloned() {
                if !recovery {
                    // Refresh a stored copy that is close to aging out.
                    if now - first_seen > NEW_START_REQUIRED_SECONDS - MIN_PING_SECONDS * 2 {
                        if let Some(entry) = inner.seen_announces.get_mut(&hash) {
                            entry.0 = now;
                        }
                        self.sync.added_enode_list(now);
                    }
                    if let Some(peer) = from {
                        self.capture_recovery_reply(&mut inner, peer, &hash, &stored, mnb, now);
                    }
                    return (true, 0);
                }
            } else {
                inner.seen_announces.insert(hash, (now, mnb.clone()));
            }
        }

        debug!(enode = %mnb.outpoint, "new announce");

        let (ok, dos, ping_ok) = self.simple_check_announce(mnb, now);
        if !ok {
            return (false, dos);
        }

        // Existing record: the update path.
        if self.has(&mnb.outpoint) {
            return self.update_existing(mnb, hash, recovery, ping_ok, now);
        }

        // New record: the outpoint must be real collateral.
        self.accept_new(mnb, hash, ping_ok, now)
    }

    fn capture_recovery_reply(
        &self,
        inner: &mut Inner,
        peer: &PeerId,
        hash: &Hash256,
        stored: &Announce,
        mnb: &Announce,
        now: i64,
    ) {
        let Some((expires, requested)) = inner.recovery_requests.get_mut(hash) else {
            return;
        };
        if now >= *expires || !requested.remove(&peer.addr) {
            return;
        }
        // One reply per asked peer; does it actually look better?
        if mnb.last_ping.sig_time <= stored.last_ping.sig_time {
            return;
        }
        let mut probe = Enode::from_announce(mnb);
        probe.check(&CheckContext {
            now,
            tip_height: self.tip_height(),
            outpoint_spent: false,
            registry_size: inner.enodes.len(),
            watchdog_active: false,
            list_synced: true,
            own_node: false,
            own_protocol_outdated: false,
            min_payment_protocol: min_payment_protocol(&self.sporks),
            force: true,
        });
        if probe.state.valid_for_auto_start() {
            debug!(enode = %mnb.outpoint, peer = %peer.addr, "good recovery reply");
            inner
                .recovery_good_replies
                .entry(*hash)
                .or_default()
                .push(mnb.clone());
        }
    }

    /// Stateless field checks shared by the update and insert paths.
    /// Returns `(ok, dos, ping_ok)`.
    fn simple_check_announce(&self, mnb: &Announce, now: i64) -> (bool, u32, bool) {
        let regtest = self.params.network == enode_types::Network::Regtest;
        if !regtest && !(mnb.addr.is_routable() && !mnb.addr.is_rfc1918() && !mnb.addr.is_local()) {
            debug!(enode = %mnb.outpoint, addr = %mnb.addr, "announce with invalid address");
            return (false, 0, false);
        }

        if mnb.sig_time > now + enode_types::FUTURE_SIG_TIME_SLACK {
            warn!(enode = %mnb.outpoint, "announce signature too far in the future");
            return (false, 1, false);
        }

        // Empty or unverifiable ping demotes the record instead of
        // rejecting the announce; the node may just be forked.
        let ping_ok = !mnb.last_ping.is_empty() && self.simple_check_ping(&mnb.last_ping, now).0;

        if mnb.protocol_version < min_payment_protocol(&self.sporks) {
            debug!(enode = %mnb.outpoint, version = mnb.protocol_version, "outdated announce ignored");
            return (false, 0, ping_ok);
        }

        if mnb.collateral_pubkey == PubKey::default() || mnb.enode_pubkey == PubKey::default() {
            warn!(enode = %mnb.outpoint, "announce with malformed keys");
            return (false, 100, ping_ok);
        }

        if !regtest && !self.params.is_valid_port(mnb.addr.port) {
            debug!(enode = %mnb.outpoint, port = mnb.addr.port, "announce with wrong port");
            return (false, 0, ping_ok);
        }

        (true, 0, ping_ok)
    }

    fn update_existing(
        &self,
        mnb: &Announce,
        hash: Hash256,
        recovery: bool,
        ping_ok: bool,
        now: i64,
    ) -> (bool, u32) {
        let Some(existing) = self.get(&mnb.outpoint) else {
            // Raced with a removal; treat as not-found.
            return (false, 0);
        };

        if existing.sig_time == mnb.sig_time && !recovery {
            // Legit duplicate that slipped past the seen filter.
            return (false, 0);
        }
        if existing.sig_time > mnb.sig_time {
            warn!(
                enode = %mnb.outpoint,
                new = mnb.sig_time,
                held = existing.sig_time,
                "older announce than the one we hold"
            );
            return (false, 0);
        }

        self.check_enode(&mnb.outpoint, false, now);
        let Some(existing) = self.get(&mnb.outpoint) else {
            return (false, 0);
        };
        if existing.is_pose_banned() {
            debug!(enode = %mnb.outpoint, "update for PoSe-banned enode rejected");
            return (false, 0);
        }
        if existing.collateral_pubkey != mnb.collateral_pubkey {
            warn!(enode = %mnb.outpoint, "announce signer mismatch");
            return (false, 33);
        }
        if mnb.verify_sig(&*self.signer).is_err() {
            warn!(enode = %mnb.outpoint, "bad announce signature on update");
            return (false, 100);
        }

        let own = self.identity.pubkey() == Some(mnb.enode_pubkey);
        if !existing.is_broadcast_within(MIN_ANNOUNCE_SECONDS, now) || own {
            let updated = {
                let mut inner = self.inner.write();
                let old_hash = inner
                    .enodes
                    .iter()
                    .find(|mn| mn.outpoint == mnb.outpoint)
                    .map(|mn| mn.to_announce().hash());
                let updated = inner
                    .enodes
                    .iter_mut()
                    .find(|mn| mn.outpoint == mnb.outpoint)
                    .map(|mn| {
                        let updated = mn.update_from_announce(mnb, recovery);
                        if updated && !ping_ok {
                            mn.state = EnodeState::Expired;
                        }
                        updated
                    })
                    .unwrap_or(false);
                if updated {
                    if let Some(old_hash) = old_hash {
                        if old_hash != hash {
                            inner.seen_announces.remove(&old_hash);
                        }
                    }
                    if !mnb.last_ping.is_empty() {
                        self.seen_pings
                            .insert(mnb.last_ping.hash(), mnb.last_ping.clone());
                    }
                }
                updated
            };
            if updated {
                if own {
                    if let Some((accepted, dos)) = self.own_announce_accepted(mnb) {
                        return (accepted, dos);
                    }
                }
                info!(enode = %mnb.outpoint, addr = %mnb.addr, "updated enode entry");
                self.check_enode(&mnb.outpoint, true, now);
                self.net.relay_inventory(inv::ANNOUNCE, hash);
            }
            self.sync.added_enode_list(now);
        }

        (true, 0)
    }

    fn accept_new(&self, mnb: &Announce, hash: Hash256, ping_ok: bool, now: i64) -> (bool, u32) {
        // Our own announce for our own collateral needs no re-check.
        if let Some(identity) = self.identity.get() {
            if identity.outpoint == mnb.outpoint && identity.enode_pubkey == mnb.enode_pubkey {
                return (false, 0);
            }
        }

        if mnb.verify_sig(&*self.signer).is_err() {
            warn!(enode = %mnb.outpoint, "bad announce signature");
            return (false, 100);
        }

        // Chain reads happen before the registry lock.
        let utxo = match self.chain.coins_get(&mnb.outpoint) {
            Ok(utxo) => utxo,
            Err(ChainError::Unavailable) => {
                // Not the announce's fault; let gossip retry it.
                self.inner.write().seen_announces.remove(&hash);
                return (false, 0);
            }
            Err(_) => {
                debug!(enode = %mnb.outpoint, "collateral UTXO not found");
                return (false, 0);
            }
        };
        if utxo.value != COLLATERAL_AMOUNT {
            debug!(enode = %mnb.outpoint, value = utxo.value, "collateral has wrong value");
            return (false, 0);
        }
        let funding_height = match self.chain.height_of_tx(&mnb.outpoint.txid) {
            Ok(height) => height,
            Err(_) => {
                debug!(enode = %mnb.outpoint, "collateral funding height unknown");
                return (false, 0);
            }
        };
        let tip = match self.chain.tip_height() {
            Some(tip) => tip,
            None => return (false, 0),
        };
        let confirmations = tip.saturating_sub(funding_height) + 1;
        if confirmations < self.params.min_collateral_confirmations {
            debug!(
                enode = %mnb.outpoint,
                confirmations, "collateral not deep enough yet"
            );
            // Maybe we are missing blocks; let it be checked again.
            self.inner.write().seen_announces.remove(&hash);
            return (false, 0);
        }
        if utxo.script != PayScript::pay_to_pubkey(&mnb.collateral_pubkey) {
            warn!(enode = %mnb.outpoint, "collateral not controlled by announce key");
            return (false, 33);
        }
        // The signature must postdate the collateral's maturity.
        let maturity_height = funding_height + self.params.min_collateral_confirmations - 1;
        if let Ok(matured_at) = self.chain.block_time_at(maturity_height) {
            if matured_at > mnb.sig_time {
                warn!(
                    enode = %mnb.outpoint,
                    sig_time = mnb.sig_time,
                    matured_at,
                    "announce predates collateral maturity"
                );
                return (false, 0);
            }
        }

        let mut mn = Enode::from_announce(mnb);
        if !ping_ok {
            mn.state = EnodeState::Expired;
        }
        let own = self.identity.pubkey() == Some(mnb.enode_pubkey);
        if own {
            mn.pose_ban_score = -POSE_BAN_MAX_SCORE;
        }
        self.add(mn);
        self.sync.added_enode_list(now);
        if !mnb.last_ping.is_empty() {
            self.seen_pings
                .insert(mnb.last_ping.hash(), mnb.last_ping.clone());
        }

        if own {
            if let Some((accepted, dos)) = self.own_announce_accepted(mnb) {
                return (accepted, dos);
            }
        }
        info!(enode = %mnb.outpoint, addr = %mnb.addr, "got new enode entry");
        self.net.relay_inventory(inv::ANNOUNCE, hash);
        (true, 0)
    }

    /// Handle an accepted announce that carries our own operating key.
    /// Returns `Some` when the normal accept flow must stop.
    fn own_announce_accepted(&self, mnb: &Announce) -> Option<(bool, u32)> {
        {
            let mut inner = self.inner.write();
            if let Some(mn) = inner
                .enodes
                .iter_mut()
                .find(|mn| mn.outpoint == mnb.outpoint)
            {
                mn.pose_ban_score = -POSE_BAN_MAX_SCORE;
            }
        }
        if mnb.protocol_version == PROTOCOL_VERSION {
            self.publish(RegistryEvent::SelfAnnounceSeen);
            None
        } else {
            warn!(
                announced = mnb.protocol_version,
                running = PROTOCOL_VERSION,
                "own announce carries wrong protocol version; re-activate this enode"
            );
            Some((false, 0))
        }
    }

    /// Trusting insert/update used for locally created announces.
    pub fn update_enode_list(&self, mnb: &Announce, now: i64) {
        {
            let mut inner = self.inner.write();
            inner
                .seen_announces
                .insert(mnb.hash(), (now, mnb.clone()));
        }
        if !mnb.last_ping.is_empty() {
            self.seen_pings
                .insert(mnb.last_ping.hash(), mnb.last_ping.clone());
        }
        info!(enode = %mnb.outpoint, addr = %mnb.addr, "local enode list update");

        if self.has(&mnb.outpoint) {
            let mut inner = self.inner.write();
            let old_hash = inner
                .enodes
                .iter()
                .find(|mn| mn.outpoint == mnb.outpoint)
                .map(|mn| mn.to_announce().hash());
            if let Some(mn) = inner
                .enodes
                .iter_mut()
                .find(|mn| mn.outpoint == mnb.outpoint)
            {
                if mn.update_from_announce(mnb, false) {
                    if let Some(old_hash) = old_hash {
                        if old_hash != mnb.hash() {
                            inner.seen_announces.remove(&old_hash);
                        }
                    }
                }
            }
        } else {
            self.add(Enode::from_announce(mnb));
        }
        self.sync.added_enode_list(now);
    }

    // ==================== ping pipeline ====================

    /// Stateless ping checks; returns `(ok, dos)`.
    fn simple_check_ping(&self, ping: &Ping, now: i64) -> (bool, u32) {
        if ping.sig_time > now + enode_types::FUTURE_SIG_TIME_SLACK {
            warn!(enode = %ping.outpoint, "ping signature too far in the future");
            return (false, 1);
        }
        if self.chain.height_of_block(&ping.block_hash).is_err() {
            debug!(
                enode = %ping.outpoint,
                block = %ping.block_hash,
                "ping references unknown block; maybe we are forked"
            );
            return (false, 0);
        }
        (true, 0)
    }

    /// Validate an inbound ping and apply it to the matching record.
    pub fn handle_ping(&self, from: Option<&PeerId>, ping: &Ping, now: i64) -> (bool, u32) {
        let hash = ping.hash();
        if self.seen_pings.contains_key(&hash) {
            return (true, 0);
        }
        self.seen_pings.insert(hash, ping.clone());
        debug!(enode = %ping.outpoint, "new ping");

        // Too late for pings; only a fresh announce revives it now.
        if let Some(mn) = self.get(&ping.outpoint) {
            if mn.is_new_start_required() {
                return (false, 0);
            }
        }

        let (accepted, dos) = self.check_and_update_ping(ping, false, now);
        if accepted {
            return (true, 0);
        }
        if dos > 0 {
            return (false, dos);
        }
        if self.has(&ping.outpoint) {
            // Known record, nothing significant failed; just stale.
            return (false, 0);
        }
        // Unknown voter; ask the sender for the record.
        if let Some(peer) = from {
            self.ask_for_entry(peer, &ping.outpoint, now);
        }
        (false, 0)
    }

    /// Core ping acceptance, shared with the announce update path.
    pub(crate) fn check_and_update_ping(
        &self,
        ping: &Ping,
        from_new_broadcast: bool,
        now: i64,
    ) -> (bool, u32) {
        let (ok, dos) = self.simple_check_ping(ping, now);
        if !ok {
            return (false, dos);
        }

        let Some(mn) = self.get(&ping.outpoint) else {
            debug!(enode = %ping.outpoint, "ping for unknown enode");
            return (false, 0);
        };

        if !from_new_broadcast {
            if mn.is_update_required() {
                debug!(enode = %ping.outpoint, "ping for outdated enode");
                return (false, 0);
            }
            if mn.is_new_start_required() {
                debug!(enode = %ping.outpoint, "ping for fully expired enode");
                return (false, 0);
            }
        }

        // A ping anchored too deep below the tip is from a fork.
        if let (Ok(height), Some(tip)) = (
            self.chain.height_of_block(&ping.block_hash),
            self.chain.tip_height(),
        ) {
            if height < tip.saturating_sub(24) {
                debug!(enode = %ping.outpoint, "ping block hash too old");
                return (false, 0);
            }
        }

        // Not more often than once per ping period, minus slack.
        if mn.is_pinged_within(MIN_PING_SECONDS - 60, ping.sig_time) {
            debug!(enode = %ping.outpoint, "ping arrived too early");
            return (false, 0);
        }

        if ping.verify_sig(&*self.signer, &mn.enode_pubkey).is_err() {
            warn!(enode = %ping.outpoint, "bad ping signature");
            return (false, 33);
        }

        // Still syncing and long silent: bump the list-sync stamp so
        // the sync machine does not give up on a live asset.
        if !self.sync.is_list_synced()
            && !mn.is_pinged_within(enode_types::EXPIRATION_SECONDS / 2, now)
        {
            self.sync.added_enode_list(now);
        }

        self.set_enode_last_ping(&ping.outpoint, ping);
        self.check_enode(&ping.outpoint, true, now);

        let enabled = self
            .get(&ping.outpoint)
            .map(|mn| mn.is_enabled())
            .unwrap_or(false);
        if !enabled {
            return (false, 0);
        }

        debug!(enode = %ping.outpoint, "ping accepted, relaying");
        self.net.relay_inventory(inv::PING, ping.hash());
        (true, 0)
    }

    /// Store a ping on a record, refreshing the seen caches.
    pub fn set_enode_last_ping(&self, outpoint: &Outpoint, ping: &Ping) {
        let mut inner = self.inner.write();
        let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == *outpoint) else {
            return;
        };
        mn.last_ping = ping.clone();
        let announce_hash = mn.to_announce().hash();
        self.seen_pings.insert(ping.hash(), ping.clone());
        if let Some((_, stored)) = inner.seen_announces.get_mut(&announce_hash) {
            stored.last_ping = ping.clone();
        }
    }

    /// Whether the record's last ping is younger than `seconds`.
    pub fn is_enode_pinged_within(&self, outpoint: &Outpoint, seconds: i64, at: i64) -> bool {
        self.get(outpoint)
            .map(|mn| mn.is_pinged_within(seconds, at))
            .unwrap_or(false)
    }

    // ==================== lifecycle ====================

    /// Run the lifecycle check over one record.
    pub fn check_enode(&self, outpoint: &Outpoint, force: bool, now: i64) {
        let Some(mn) = self.get(outpoint) else { return };
        let ctx = self.check_context(&mn, force, now);
        let mut inner = self.inner.write();
        if let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == *outpoint) {
            mn.check(&ctx);
        }
    }

    fn check_context(&self, mn: &Enode, force: bool, now: i64) -> CheckContext {
        let (tip, outpoint_spent) = match self.chain.coins_get(&mn.outpoint) {
            Ok(_) => (self.chain.tip_height(), false),
            // Chain state busy; the record check skips this round.
            Err(ChainError::Unavailable) => (None, false),
            Err(_) => (self.chain.tip_height(), true),
        };
        let own = self.identity.pubkey() == Some(mn.enode_pubkey);
        CheckContext {
            now,
            tip_height: tip,
            outpoint_spent,
            registry_size: self.size(),
            watchdog_active: self.sync.is_synced() && self.is_watchdog_active(now),
            list_synced: self.sync.is_list_synced(),
            own_node: own,
            own_protocol_outdated: own && mn.protocol_version < PROTOCOL_VERSION,
            min_payment_protocol: min_payment_protocol(&self.sporks),
            force,
        }
    }

    /// Run the lifecycle check over every record.
    pub fn check(&self, now: i64) {
        // Chain reads first: snapshot, query, then apply.
        let snapshot = self.all();
        let contexts: Vec<(Outpoint, CheckContext)> = snapshot
            .iter()
            .map(|mn| (mn.outpoint, self.check_context(mn, false, now)))
            .collect();

        let mut inner = self.inner.write();
        for (outpoint, ctx) in contexts {
            if let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == outpoint) {
                mn.check(&ctx);
            }
        }
    }

    // ==================== housekeeping ====================

    /// Periodic housekeeping: drop spent records, run recovery rounds,
    /// expire the ask/seen maps.
    pub fn check_and_remove(&self, now: i64) {
        if !self.sync.is_list_synced() {
            return;
        }
        debug!("registry housekeeping");

        self.check(now);

        // Precompute ranks for recovery before mutating anything; the
        // rank pass takes chain and registry locks of its own.
        let needs_recovery = {
            let inner = self.inner.read();
            self.sync.is_synced()
                && inner.enodes.iter().any(|mn| {
                    mn.is_new_start_required()
                        && !inner
                            .recovery_requests
                            .contains_key(&mn.to_announce().hash())
                })
        };
        let ranks = if needs_recovery {
            let random_height = self
                .tip_height()
                .map(|tip| rand::thread_rng().gen_range(0..=tip))
                .unwrap_or(0);
            self.get_ranks(random_height, 0)
        } else {
            Vec::new()
        };

        let mut to_reprocess: Vec<Announce> = Vec::new();
        {
            let mut inner = self.inner.write();
            let mut ask_budget = RECOVERY_MAX_ASK_ENTRIES;

            let mut idx = 0;
            while idx < inner.enodes.len() {
                let mn = inner.enodes[idx].clone();
                let hash = mn.to_announce().hash();
                if mn.is_outpoint_spent() {
                    debug!(
                        enode = %mn.outpoint,
                        state = %mn.state,
                        total = inner.enodes.len() - 1,
                        "removing spent enode"
                    );
                    inner.seen_announces.remove(&hash);
                    inner.we_asked_for_entry.remove(&mn.outpoint);
                    inner.enodes.remove(idx);
                    inner.enodes_removed = true;
                    continue;
                }

                let ask = self.tip_height().is_some()
                    && ask_budget > 0
                    && self.sync.is_synced()
                    && mn.is_new_start_required()
                    && !inner.recovery_requests.contains_key(&hash);
                if ask {
                    let mut requested: HashSet<NetAddr> = HashSet::new();
                    for (_, ranked) in &ranks {
                        if requested.len() >= RECOVERY_QUORUM_TOTAL {
                            break;
                        }
                        // Avoid peers we recently asked about this entry.
                        let recently_asked = inner
                            .we_asked_for_entry
                            .get(&mn.outpoint)
                            .map(|m| m.contains_key(&ranked.addr))
                            .unwrap_or(false);
                        if recently_asked {
                            continue;
                        }
                        requested.insert(ranked.addr);
                        inner
                            .scheduled_recovery_connections
                            .push((ranked.addr, hash));
                    }
                    if !requested.is_empty() {
                        debug!(enode = %mn.outpoint, peers = requested.len(), "recovery initiated");
                        ask_budget -= 1;
                    }
                    inner
                        .recovery_requests
                        .insert(hash, (now + RECOVERY_WAIT_SECONDS, requested));
                }
                idx += 1;
            }

            // Resolve finished recovery rounds.
            let finished: Vec<Hash256> = inner
                .recovery_good_replies
                .keys()
                .filter(|hash| {
                    inner
                        .recovery_requests
                        .get(*hash)
                        .map(|(expires, _)| *expires < now)
                        .unwrap_or(true)
                })
                .copied()
                .collect();
            for hash in finished {
                if let Some(replies) = inner.recovery_good_replies.remove(&hash) {
                    if replies.len() >= RECOVERY_QUORUM_REQUIRED {
                        debug!(enode = %replies[0].outpoint, "reprocessing recovered announce");
                        to_reprocess.push(replies[0].clone());
                    }
                }
            }

            // Expire recovery requests after the retry window.
            inner
                .recovery_requests
                .retain(|_, (expires, _)| now - *expires <= RECOVERY_RETRY_SECONDS);

            // Expire the ask maps.
            inner.asked_us_for_list.retain(|_, at| *at >= now);
            inner.we_asked_for_list.retain(|_, at| *at >= now);
            inner.we_asked_for_entry.retain(|_, per_peer| {
                per_peer.retain(|_, at| *at >= now);
                !per_peer.is_empty()
            });
            inner.fulfilled_requests.retain(|_, at| *at >= now);

            if let Some(tip) = self.tip_height() {
                inner
                    .we_asked_for_verification
                    .retain(|_, mnv| mnv.block_height >= tip.saturating_sub(MAX_POSE_BLOCKS));
            }
        }

        // Recovered announces re-enter through the full pipeline with
        // the recovery override set.
        for mnb in to_reprocess {
            self.check_and_update(None, &mnb, true, now);
        }

        // Expire seen caches.
        self.seen_pings.retain(|_, ping| !ping.is_expired(now));
        if let Some(tip) = self.tip_height() {
            self.seen_verifies
                .retain(|_, mnv| mnv.block_height >= tip.saturating_sub(MAX_POSE_BLOCKS));
        }

        let removed = {
            let inner = self.inner.read();
            inner.enodes_removed
        };
        if removed {
            self.check_and_rebuild_index(now);
        }

        let inner = self.inner.read();
        info!(
            enodes = inner.enodes.len(),
            asked_us = inner.asked_us_for_list.len(),
            we_asked = inner.we_asked_for_list.len(),
            entries_asked = inner.we_asked_for_entry.len(),
            index = inner.index.len(),
            dsq = inner.dsq_count,
            "registry state"
        );
    }

    /// Take the next scheduled recovery connection, grouped by address.
    pub fn pop_scheduled_recovery_connection(&self) -> Option<(NetAddr, Vec<Hash256>)> {
        let mut inner = self.inner.write();
        inner.scheduled_recovery_connections.sort();
        let (addr, _) = *inner.scheduled_recovery_connections.first()?;
        let mut hashes = Vec::new();
        inner.scheduled_recovery_connections.retain(|(a, hash)| {
            if *a == addr {
                hashes.push(*hash);
                false
            } else {
                true
            }
        });
        hashes.dedup();
        Some((addr, hashes))
    }

    /// Whether a recovery round is open for an announce hash.
    pub fn is_recovery_requested(&self, hash: &Hash256) -> bool {
        self.inner.read().recovery_requests.contains_key(hash)
    }

    /// Connect to the next scheduled recovery peer and ask it for the
    /// records under recovery.
    pub fn process_scheduled_connections(&self) {
        let Some((addr, hashes)) = self.pop_scheduled_recovery_connection() else {
            return;
        };
        let Some(peer) = self.net.connect(addr) else {
            warn!(%addr, "cannot connect for enode recovery");
            return;
        };
        for hash in hashes {
            let outpoint = {
                let inner = self.inner.read();
                inner
                    .seen_announces
                    .get(&hash)
                    .map(|(_, mnb)| mnb.outpoint)
            };
            if let Some(outpoint) = outpoint {
                debug!(enode = %outpoint, peer = %addr, "requesting recovery announce");
                self.net.send(&peer, commands::DSEG, encode_dseg(&outpoint));
            }
        }
    }

    /// Rebuild the dense index when it outgrew the registry.
    pub fn check_and_rebuild_index(&self, now: i64) {
        let mut inner = self.inner.write();
        if now - inner.last_index_rebuild < MIN_INDEX_REBUILD_SECONDS {
            return;
        }
        if inner.index.len() <= MAX_EXPECTED_INDEX_SIZE {
            return;
        }
        if inner.index.len() <= inner.enodes.len() {
            return;
        }
        inner.old_index = inner.index.clone();
        inner.index.clear();
        let outpoints: Vec<Outpoint> = inner.enodes.iter().map(|mn| mn.outpoint).collect();
        for outpoint in outpoints {
            inner.index.insert(outpoint);
        }
        inner.index_rebuilt = true;
        inner.last_index_rebuild = now;
        info!(size = inner.index.len(), "rebuilt enode index");
    }

    // ==================== watchdog ====================

    /// Any enode voted watchdog-recently.
    pub fn is_watchdog_active(&self, now: i64) -> bool {
        now - self.inner.read().last_watchdog_vote_time <= WATCHDOG_MAX_SECONDS
    }

    /// Stamp a watchdog vote for an enode.
    pub fn update_watchdog_vote_time(&self, outpoint: &Outpoint, now: i64) {
        let mut inner = self.inner.write();
        let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == *outpoint) else {
            return;
        };
        mn.update_watchdog_vote_time(now);
        inner.last_watchdog_vote_time = now;
    }

    // ==================== payment bookkeeping ====================

    /// Record an observed payout for an enode.
    pub fn set_last_paid(&self, outpoint: &Outpoint, block: u32, time: i64) {
        let mut inner = self.inner.write();
        if let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == *outpoint) {
            mn.block_last_paid = block;
            mn.time_last_paid = time;
        }
    }

    /// Cache collateral funding heights for records missing them.
    pub(crate) fn ensure_collateral_heights(&self) {
        let missing: Vec<Outpoint> = {
            let inner = self.inner.read();
            inner
                .enodes
                .iter()
                .filter(|mn| mn.collateral_block_cache == 0)
                .map(|mn| mn.outpoint)
                .collect()
        };
        if missing.is_empty() {
            return;
        }
        let mut resolved = Vec::new();
        for outpoint in missing {
            if let Ok(height) = self.chain.height_of_tx(&outpoint.txid) {
                resolved.push((outpoint, height));
            }
        }
        let mut inner = self.inner.write();
        for (outpoint, height) in resolved {
            if let Some(mn) = inner.enodes.iter_mut().find(|mn| mn.outpoint == outpoint) {
                mn.collateral_block_cache = height;
            }
        }
    }

    // ==================== tip notifications ====================

    /// A new chain tip was connected.
    pub fn updated_block_tip(&self, height: u32) {
        *self.tip.write() = Some(height);
        debug!(height, "registry saw new tip");
        self.check_same_addr();
    }

    /// Drop everything; used when the cache version mismatches.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::default();
        drop(inner);
        self.seen_pings.clear();
        self.seen_verifies.clear();
    }
}
