//! Mock host interfaces for integration tests.
//!
//! Everything is deterministic: block hashes derive from heights, the
//! clock is an explicit atomic, and every outbound network effect is
//! recorded for assertions.

use enode_chain::{
    Chain, ChainError, CoinbaseOutputs, CollateralOutput, Net, PeerId, TxOut, Wallet, WalletError,
};
use enode_sync::SyncManager;
use enode_types::{sha256d, Hash256, NetAddr, Outpoint, PayScript, PubKey, SecretKey};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Deterministic hash for the block at `height`.
pub fn block_hash(height: u32) -> Hash256 {
    sha256d(format!("block-{height}").as_bytes())
}

/// A settable, deterministic chain view.
pub struct MockChain {
    tip: RwLock<Option<u32>>,
    utxos: RwLock<HashMap<Outpoint, TxOut>>,
    tx_heights: RwLock<HashMap<Hash256, u32>>,
    coinbases: RwLock<HashMap<u32, CoinbaseOutputs>>,
    synced: AtomicBool,
    now: AtomicI64,
    base_time: i64,
}

impl MockChain {
    /// Chain with a tip and a clock.
    pub fn new(tip: u32, now: i64) -> Self {
        Self {
            tip: RwLock::new(Some(tip)),
            utxos: RwLock::new(HashMap::new()),
            tx_heights: RwLock::new(HashMap::new()),
            coinbases: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(true),
            now: AtomicI64::new(now),
            base_time: 1_600_000_000,
        }
    }

    /// Move the tip.
    pub fn set_tip(&self, height: u32) {
        *self.tip.write() = Some(height);
    }

    /// Flip the initial-block-download flag.
    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    /// Set the clock.
    pub fn set_now(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    /// Advance the clock.
    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Register an unspent output funded at `height`.
    pub fn add_utxo(&self, outpoint: Outpoint, value: u64, script: PayScript, height: u32) {
        self.utxos.write().insert(outpoint, TxOut { value, script });
        self.tx_heights.write().insert(outpoint.txid, height);
    }

    /// Remove an output from the UTXO set.
    pub fn spend(&self, outpoint: &Outpoint) {
        self.utxos.write().remove(outpoint);
    }

    /// Install the coinbase for a height.
    pub fn set_coinbase(&self, height: u32, coinbase: CoinbaseOutputs) {
        self.coinbases.write().insert(height, coinbase);
    }
}

impl Chain for MockChain {
    fn tip_height(&self) -> Option<u32> {
        *self.tip.read()
    }

    fn block_hash_at(&self, height: u32) -> Result<Hash256, ChainError> {
        match self.tip_height() {
            Some(tip) if height <= tip => Ok(block_hash(height)),
            _ => Err(ChainError::UnknownHeight(height)),
        }
    }

    fn block_time_at(&self, height: u32) -> Result<i64, ChainError> {
        match self.tip_height() {
            Some(tip) if height <= tip => Ok(self.base_time + height as i64 * 150),
            _ => Err(ChainError::UnknownHeight(height)),
        }
    }

    fn coinbase_at(&self, height: u32) -> Result<CoinbaseOutputs, ChainError> {
        self.coinbases
            .read()
            .get(&height)
            .cloned()
            .ok_or(ChainError::UnknownHeight(height))
    }

    fn coins_get(&self, outpoint: &Outpoint) -> Result<TxOut, ChainError> {
        self.utxos
            .read()
            .get(outpoint)
            .cloned()
            .ok_or(ChainError::OutpointNotFound)
    }

    fn height_of_tx(&self, txid: &Hash256) -> Result<u32, ChainError> {
        self.tx_heights
            .read()
            .get(txid)
            .copied()
            .ok_or(ChainError::UnknownBlock)
    }

    fn height_of_block(&self, hash: &Hash256) -> Result<u32, ChainError> {
        let tip = self.tip_height().ok_or(ChainError::UnknownBlock)?;
        // Scan the deterministic hashes near the tip.
        for height in (0..=tip).rev().take(1000) {
            if block_hash(height) == *hash {
                return Ok(height);
            }
        }
        Err(ChainError::UnknownBlock)
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    fn adjusted_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// One recorded outbound message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub peer: u64,
    pub command: &'static str,
    pub payload: Vec<u8>,
}

/// A peer set that records every outbound effect.
#[derive(Default)]
pub struct MockNet {
    peers: RwLock<Vec<PeerId>>,
    connectable: RwLock<HashSet<NetAddr>>,
    pub sent: RwLock<Vec<SentMessage>>,
    pub inventories: RwLock<Vec<(u64, u32, Hash256)>>,
    pub relayed: RwLock<Vec<(u32, Hash256)>>,
    pub requested: RwLock<Vec<(u64, Vec<(u32, Hash256)>)>>,
    pub misbehavior: RwLock<HashMap<u64, u32>>,
    local_addr: RwLock<Option<NetAddr>>,
    next_peer_id: AtomicI64,
}

impl MockNet {
    /// Empty peer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connected peer at `addr` and return it.
    pub fn add_peer(&self, addr: NetAddr) -> PeerId {
        let peer = PeerId {
            id: self.next_peer_id.fetch_add(1, Ordering::SeqCst) as u64 + 1,
            addr,
            version: enode_types::params::PROTOCOL_VERSION,
        };
        self.peers.write().push(peer);
        self.connectable.write().insert(addr);
        peer
    }

    /// Make an address connectable without listing it as connected.
    pub fn allow_connect(&self, addr: NetAddr) {
        self.connectable.write().insert(addr);
    }

    /// The address peers see us under.
    pub fn set_local_address(&self, addr: NetAddr) {
        *self.local_addr.write() = Some(addr);
    }

    /// Total misbehavior score recorded for a peer.
    pub fn misbehavior_of(&self, peer: &PeerId) -> u32 {
        self.misbehavior.read().get(&peer.id).copied().unwrap_or(0)
    }

    /// Commands sent to a peer.
    pub fn commands_to(&self, peer: &PeerId) -> Vec<&'static str> {
        self.sent
            .read()
            .iter()
            .filter(|msg| msg.peer == peer.id)
            .map(|msg| msg.command)
            .collect()
    }
}

impl Net for MockNet {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.read().clone()
    }

    fn send(&self, peer: &PeerId, command: &'static str, payload: Vec<u8>) {
        self.sent.write().push(SentMessage {
            peer: peer.id,
            command,
            payload,
        });
    }

    fn push_inventory(&self, peer: &PeerId, kind: u32, hash: Hash256) {
        self.inventories.write().push((peer.id, kind, hash));
    }

    fn relay_inventory(&self, kind: u32, hash: Hash256) {
        self.relayed.write().push((kind, hash));
    }

    fn request_data(&self, peer: &PeerId, invs: Vec<(u32, Hash256)>) {
        self.requested.write().push((peer.id, invs));
    }

    fn connect(&self, addr: NetAddr) -> Option<PeerId> {
        if !self.connectable.read().contains(&addr) {
            return None;
        }
        if let Some(existing) = self.peers.read().iter().find(|p| p.addr == addr) {
            return Some(*existing);
        }
        Some(PeerId {
            id: self.next_peer_id.fetch_add(1, Ordering::SeqCst) as u64 + 1,
            addr,
            version: enode_types::params::PROTOCOL_VERSION,
        })
    }

    fn misbehaving(&self, peer: &PeerId, score: u32) {
        *self.misbehavior.write().entry(peer.id).or_insert(0) += score;
    }

    fn local_address_for(&self, _peer: &PeerId) -> Option<NetAddr> {
        *self.local_addr.read()
    }
}

/// A wallet with one optional collateral.
pub struct MockWallet {
    pub locked: AtomicBool,
    pub balance: AtomicI64,
    pub collateral: RwLock<Option<CollateralOutput>>,
    pub locked_coins: RwLock<Vec<Outpoint>>,
}

impl MockWallet {
    /// Unlocked, empty wallet.
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            balance: AtomicI64::new(0),
            collateral: RwLock::new(None),
            locked_coins: RwLock::new(Vec::new()),
        }
    }

    /// Give the wallet a collateral output and a matching balance.
    pub fn fund(&self, collateral: CollateralOutput) {
        self.balance
            .store(enode_types::COLLATERAL_AMOUNT as i64, Ordering::SeqCst);
        *self.collateral.write() = Some(collateral);
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet for MockWallet {
    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn balance(&self) -> u64 {
        self.balance.load(Ordering::SeqCst) as u64
    }

    fn select_collateral_output(&self) -> Result<CollateralOutput, WalletError> {
        if self.is_locked() {
            return Err(WalletError::Locked);
        }
        self.collateral
            .read()
            .clone()
            .ok_or(WalletError::NoCollateral)
    }

    fn lock_coin(&self, outpoint: &Outpoint) {
        self.locked_coins.write().push(*outpoint);
    }
}

/// Deterministic secret key; `tag` must be nonzero.
pub fn secret(tag: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[31] = tag;
    SecretKey::from_bytes(bytes)
}

/// A routable test address with a per-node host byte.
pub fn routable_addr(tag: u8, port: u16) -> NetAddr {
    NetAddr::parse(&format!("51.38.2.{tag}:{port}")).unwrap()
}

/// Drive a fresh sync manager all the way to `Finished`.
pub fn sync_to_finished(sync: &SyncManager, net: &MockNet, now: i64) {
    let peers = net.connected_peers();
    assert!(peers.len() >= 3, "sync needs at least three peers");
    let mut t = now;
    // Sporks.
    sync.tick(t, true, &peers);
    // List.
    t += 6;
    sync.tick(t, true, &peers);
    sync.added_enode_list(t);
    for _ in 0..3 {
        sync.note_status_count(2, 1, t);
    }
    t += 6;
    sync.tick(t, true, &peers);
    // Winners.
    for _ in 0..3 {
        sync.note_status_count(3, 1, t);
    }
    t += 6;
    sync.tick(t, true, &peers);
    assert!(sync.is_synced(), "sync harness failed to finish");
}

/// Expose the protocol pubkey for a secret, via the production signer.
pub fn pubkey_of(signer: &dyn enode_chain::Signer, key: &SecretKey) -> PubKey {
    signer.derive_pubkey(key).expect("valid test key")
}
