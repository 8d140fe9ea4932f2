//! The process's own enode identity.
//!
//! Set by the activation component once a collateral is adopted, read
//! by the payment and verification paths. Holding it behind one shared
//! cell keeps the former global singleton out of every call site.

use enode_types::{NetAddr, Outpoint, PubKey, SecretKey};
use parking_lot::RwLock;
use std::sync::Arc;

/// Identity of the locally running enode.
#[derive(Debug, Clone)]
pub struct ActiveIdentity {
    /// Collateral outpoint this node answers for.
    pub outpoint: Outpoint,
    /// Advertised endpoint.
    pub addr: NetAddr,
    /// Operating (ping/vote) public key.
    pub enode_pubkey: PubKey,
    /// Operating private key.
    pub enode_key: SecretKey,
}

/// Shared, optional identity cell.
#[derive(Clone, Default)]
pub struct SharedIdentity {
    inner: Arc<RwLock<Option<ActiveIdentity>>>,
}

impl SharedIdentity {
    /// Empty cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the identity, if set.
    pub fn get(&self) -> Option<ActiveIdentity> {
        self.inner.read().clone()
    }

    /// Install or replace the identity.
    pub fn set(&self, identity: ActiveIdentity) {
        *self.inner.write() = Some(identity);
    }

    /// Drop the identity.
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// The adopted outpoint, if any.
    pub fn outpoint(&self) -> Option<Outpoint> {
        self.inner.read().as_ref().map(|id| id.outpoint)
    }

    /// The operating pubkey, if any.
    pub fn pubkey(&self) -> Option<PubKey> {
        self.inner.read().as_ref().map(|id| id.enode_pubkey)
    }
}
