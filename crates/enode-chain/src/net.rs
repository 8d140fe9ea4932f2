//! Peer-set interface.

use enode_types::{Hash256, NetAddr};

/// A connected peer, as much of it as the subsystem needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerId {
    /// Host-assigned connection id.
    pub id: u64,
    /// Remote endpoint.
    pub addr: NetAddr,
    /// Peer's advertised protocol version.
    pub version: i32,
}

/// P2P overlay interface.
///
/// `send` carries an already-encoded payload under a wire command token;
/// inventory methods announce message hashes for pull-based relay.
pub trait Net: Send + Sync {
    /// Snapshot of currently connected peers.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Send an encoded message to one peer.
    fn send(&self, peer: &PeerId, command: &'static str, payload: Vec<u8>);

    /// Announce an inventory item to one peer.
    fn push_inventory(&self, peer: &PeerId, kind: u32, hash: Hash256);

    /// Announce an inventory item to every peer.
    fn relay_inventory(&self, kind: u32, hash: Hash256);

    /// Request inventory items directly from one peer.
    fn request_data(&self, peer: &PeerId, invs: Vec<(u32, Hash256)>);

    /// Open (or reuse) a connection to `addr`.
    fn connect(&self, addr: NetAddr) -> Option<PeerId>;

    /// Raise a peer's misbehavior score.
    fn misbehaving(&self, peer: &PeerId, score: u32);

    /// Our own externally visible address as reported by a connected
    /// peer, if the host learned one during the handshake.
    fn local_address_for(&self, peer: &PeerId) -> Option<NetAddr>;
}
