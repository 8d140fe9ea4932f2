//! Operator-controlled feature flags ("sporks").
//!
//! Spork distribution itself is handled by the host node; this is the
//! subsystem's view of which flags are currently active.

use parking_lot::RwLock;
use std::collections::HashSet;

/// Sporks the enode subsystem reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SporkId {
    /// Reject blocks whose coinbase skips the elected payee.
    PaymentEnforcement,
    /// Superblock payments (always a non-goal here; value checks only).
    Superblocks,
    /// Require the newer payment protocol version.
    PayUpdatedNodes,
}

/// Thread-safe set of active sporks.
#[derive(Default)]
pub struct SporkSet {
    active: RwLock<HashSet<SporkId>>,
}

impl SporkSet {
    /// Empty set; nothing active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a spork is active.
    pub fn is_active(&self, id: SporkId) -> bool {
        self.active.read().contains(&id)
    }

    /// Activate or deactivate a spork.
    pub fn set_active(&self, id: SporkId, active: bool) {
        let mut set = self.active.write();
        if active {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }
}

/// Minimum protocol allowed to vote and win payments right now.
pub fn min_payment_protocol(sporks: &SporkSet) -> i32 {
    if sporks.is_active(SporkId::PayUpdatedNodes) {
        enode_types::params::MIN_PAYMENT_PROTO_V2
    } else {
        enode_types::params::MIN_PAYMENT_PROTO_V1
    }
}
