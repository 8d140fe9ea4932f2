//! Staged synchronization of enode data.
//!
//! Assets are fetched in a fixed order: sporks, then the registry list,
//! then payment winners. The machine never does I/O itself; each tick
//! returns the requests the node layer should send, and downstream
//! components report received data back through the stamp methods.

use enode_chain::PeerId;
use enode_types::NetAddr;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Seconds between sync ticks.
pub const SYNC_TICK_SECONDS: i64 = 6;

/// Give up waiting on an asset after this long without data.
pub const SYNC_TIMEOUT_SECONDS: i64 = 30;

/// Peers whose replies satisfy an asset.
pub const SYNC_ENOUGH_PEERS: usize = 3;

/// Consecutive empty timeouts before the machine latches `Failed`.
pub const SYNC_FAILURES_MAX: u32 = 5;

/// The asset currently being synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncAsset {
    /// Hard failure; `reset` required.
    Failed,
    /// Nothing requested yet.
    Initial,
    /// Operator feature flags.
    Sporks,
    /// The enode registry list.
    List,
    /// Payment winner votes.
    Winners,
    /// Everything fetched.
    Finished,
}

impl SyncAsset {
    fn next(self) -> SyncAsset {
        match self {
            SyncAsset::Initial => SyncAsset::Sporks,
            SyncAsset::Sporks => SyncAsset::List,
            SyncAsset::List => SyncAsset::Winners,
            _ => SyncAsset::Finished,
        }
    }

    /// Human-readable asset name for status reporting.
    pub fn name(self) -> &'static str {
        match self {
            SyncAsset::Failed => "FAILED",
            SyncAsset::Initial => "INITIAL",
            SyncAsset::Sporks => "SPORKS",
            SyncAsset::List => "LIST",
            SyncAsset::Winners => "WINNERS",
            SyncAsset::Finished => "FINISHED",
        }
    }
}

/// A request the node layer should send on the machine's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Ask a peer for its spork set.
    AskSporks(PeerId),
    /// Ask a peer for the whole enode list (rate-limited downstream).
    AskList(PeerId),
    /// Ask a peer for payment winner votes.
    AskWinners(PeerId),
}

#[derive(Default)]
struct Inner {
    asset: Option<SyncAsset>,
    attempt: usize,
    peers_replied: usize,
    asked: HashSet<NetAddr>,
    asset_started: i64,
    last_list: i64,
    last_vote: i64,
    last_failure: i64,
    failure_count: u32,
}

impl Inner {
    fn asset(&self) -> SyncAsset {
        self.asset.unwrap_or(SyncAsset::Initial)
    }

    fn switch(&mut self, next: SyncAsset, now: i64) {
        info!(from = self.asset().name(), to = next.name(), "sync asset switch");
        self.asset = Some(next);
        self.attempt = 0;
        self.peers_replied = 0;
        self.asked.clear();
        self.asset_started = now;
    }

    fn stamp(&self) -> i64 {
        match self.asset() {
            SyncAsset::List => self.last_list,
            SyncAsset::Winners => self.last_vote,
            _ => 0,
        }
    }
}

/// The sync state machine.
#[derive(Default)]
pub struct SyncManager {
    inner: Mutex<Inner>,
}

impl SyncManager {
    /// Fresh machine in `Initial`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current asset.
    pub fn asset(&self) -> SyncAsset {
        self.inner.lock().asset()
    }

    /// Peers asked for the current asset so far.
    pub fn attempt(&self) -> usize {
        self.inner.lock().attempt
    }

    /// Hard-failed and waiting for an external reset.
    pub fn is_failed(&self) -> bool {
        self.asset() == SyncAsset::Failed
    }

    /// Timestamp of the most recent hard failure, 0 if none.
    pub fn last_failure_at(&self) -> i64 {
        self.inner.lock().last_failure
    }

    /// Hard failures since the last reset.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// All assets fetched.
    pub fn is_synced(&self) -> bool {
        self.asset() == SyncAsset::Finished
    }

    /// The registry list stage is behind us.
    pub fn is_list_synced(&self) -> bool {
        self.asset() > SyncAsset::List
    }

    /// The winners stage is behind us.
    pub fn is_winners_synced(&self) -> bool {
        self.asset() > SyncAsset::Winners
    }

    /// Registry accepted a list item; keeps the list stage alive.
    pub fn added_enode_list(&self, now: i64) {
        self.inner.lock().last_list = now;
    }

    /// Payment engine accepted a vote; keeps the winners stage alive.
    pub fn added_payment_vote(&self, now: i64) {
        self.inner.lock().last_vote = now;
    }

    /// A peer finished streaming an asset (`SYNCSTATUSCOUNT`).
    pub fn note_status_count(&self, item_id: i32, count: i32, now: i64) {
        let mut inner = self.inner.lock();
        let matches = matches!(
            (inner.asset(), item_id),
            (SyncAsset::List, enode_messages_item::LIST)
                | (SyncAsset::Winners, enode_messages_item::WINNERS)
        );
        if matches {
            inner.peers_replied += 1;
            if count > 0 {
                match inner.asset() {
                    SyncAsset::List => inner.last_list = now,
                    SyncAsset::Winners => inner.last_vote = now,
                    _ => {}
                }
            }
            debug!(
                asset = inner.asset().name(),
                count, replied = inner.peers_replied, "sync status count"
            );
        }
    }

    /// Back to `Initial`, clearing failure history.
    pub fn reset(&self, now: i64) {
        let mut inner = self.inner.lock();
        info!("sync reset");
        inner.switch(SyncAsset::Initial, now);
        inner.failure_count = 0;
        inner.last_list = 0;
        inner.last_vote = 0;
    }

    /// One scheduling round; returns requests to execute.
    pub fn tick(&self, now: i64, blockchain_synced: bool, peers: &[PeerId]) -> Vec<SyncAction> {
        let mut inner = self.inner.lock();
        let mut actions = Vec::new();

        match inner.asset() {
            SyncAsset::Failed | SyncAsset::Finished => return actions,
            _ => {}
        }
        if !blockchain_synced {
            return actions;
        }
        if inner.asset() == SyncAsset::Initial {
            inner.switch(SyncAsset::Sporks, now);
        }

        // Ask fresh peers for the current asset.
        let asset = inner.asset();
        for peer in peers {
            if inner.attempt >= SYNC_ENOUGH_PEERS {
                break;
            }
            if !inner.asked.insert(peer.addr) {
                continue;
            }
            inner.attempt += 1;
            actions.push(match asset {
                SyncAsset::Sporks => SyncAction::AskSporks(*peer),
                SyncAsset::List => SyncAction::AskList(*peer),
                SyncAsset::Winners => SyncAction::AskWinners(*peer),
                _ => unreachable!("asked only in fetch stages"),
            });
        }

        // Advancement rules.
        let advanced = match asset {
            SyncAsset::Sporks => {
                // Sporks arrive unsolicited once requested; enough asks
                // are as good as enough replies.
                inner.attempt >= SYNC_ENOUGH_PEERS
            }
            SyncAsset::List | SyncAsset::Winners => {
                if inner.peers_replied >= SYNC_ENOUGH_PEERS {
                    true
                } else {
                    let reference = inner.asset_started.max(inner.stamp());
                    if now - reference > SYNC_TIMEOUT_SECONDS {
                        if inner.attempt == 0 {
                            // Could not even ask anyone; hard failure.
                            inner.failure_count += 1;
                            inner.last_failure = now;
                            warn!(
                                asset = asset.name(),
                                failures = inner.failure_count,
                                "sync asset timed out with no peers"
                            );
                            inner.switch(SyncAsset::Failed, now);
                            return actions;
                        }
                        let progressed = inner.stamp() > inner.asset_started;
                        if !progressed {
                            inner.failure_count += 1;
                            inner.last_failure = now;
                            warn!(
                                asset = asset.name(),
                                failures = inner.failure_count,
                                "sync asset timed out with no data"
                            );
                            if inner.failure_count >= SYNC_FAILURES_MAX {
                                inner.switch(SyncAsset::Failed, now);
                                return actions;
                            }
                        }
                        true
                    } else {
                        false
                    }
                }
            }
            _ => false,
        };

        if advanced {
            let next = asset.next();
            inner.switch(next, now);
            if next == SyncAsset::Finished {
                info!("enode sync finished");
            }
        }

        actions
    }
}

/// Asset ids as they appear in `SYNCSTATUSCOUNT` payloads. Kept local
/// so this crate does not depend on the message crate.
mod enode_messages_item {
    pub const LIST: i32 = 2;
    pub const WINNERS: i32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId {
            id: n as u64,
            addr: NetAddr::parse(&format!("10.1.1.{n}:9999")).unwrap(),
            version: 90026,
        }
    }

    fn peers(n: u8) -> Vec<PeerId> {
        (1..=n).map(peer).collect()
    }

    #[test]
    fn waits_for_blockchain() {
        let sync = SyncManager::new();
        assert!(sync.tick(100, false, &peers(3)).is_empty());
        assert_eq!(sync.asset(), SyncAsset::Initial);
    }

    #[test]
    fn walks_assets_with_enough_replies() {
        let sync = SyncManager::new();
        let peers = peers(4);

        // Initial -> Sporks, asks three peers, advances to List.
        let actions = sync.tick(100, true, &peers);
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0], SyncAction::AskSporks(_)));
        assert_eq!(sync.asset(), SyncAsset::List);

        let actions = sync.tick(106, true, &peers);
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0], SyncAction::AskList(_)));

        sync.added_enode_list(107);
        for _ in 0..3 {
            sync.note_status_count(2, 10, 108);
        }
        sync.tick(112, true, &peers);
        assert_eq!(sync.asset(), SyncAsset::Winners);
        assert!(sync.is_list_synced());

        for _ in 0..3 {
            sync.note_status_count(3, 4, 114);
        }
        sync.tick(118, true, &peers);
        assert!(sync.is_synced());
        assert!(sync.is_winners_synced());
        // Finished machine stays quiet.
        assert!(sync.tick(124, true, &peers).is_empty());
    }

    #[test]
    fn timeout_with_progress_advances() {
        let sync = SyncManager::new();
        let peers = peers(3);
        sync.tick(100, true, &peers); // -> List
        sync.added_enode_list(110);
        // Quiet for 30s after the last item.
        sync.tick(141, true, &peers);
        assert_eq!(sync.asset(), SyncAsset::Winners);
    }

    #[test]
    fn no_peers_latches_failed() {
        let sync = SyncManager::new();
        // Bootstrap with peers, then lose them all during List.
        sync.tick(100, true, &peers(3)); // -> List
        sync.tick(105, true, &[]);
        assert!(!sync.is_failed());
        // The earlier asks count; drain them by restarting the asset.
        sync.reset(105);
        sync.tick(106, true, &[]); // -> Sporks with nobody to ask
        assert_eq!(sync.asset(), SyncAsset::Sporks);
        // Sporks cannot advance without peers; let one tick with
        // connections push it to List, then drop them again.
        sync.tick(107, true, &peers(3));
        assert_eq!(sync.asset(), SyncAsset::List);
        // List was never asked from anyone; timing out there fails.
        sync.tick(107 + SYNC_TIMEOUT_SECONDS + 1, true, &[]);
        assert!(sync.is_failed());

        // Failed stays latched until reset.
        assert!(sync.tick(500, true, &peers(3)).is_empty());
        sync.reset(500);
        assert_eq!(sync.asset(), SyncAsset::Initial);
        sync.tick(501, true, &peers(3));
        assert!(!sync.is_failed());
    }

    #[test]
    fn reset_clears_failures() {
        let sync = SyncManager::new();
        sync.reset(50);
        assert_eq!(sync.asset(), SyncAsset::Initial);
    }
}
