//! Wallet interface.

use crate::WalletError;
use enode_types::{Outpoint, PubKey, SecretKey};

/// A wallet-controlled output suitable as enode collateral.
#[derive(Debug, Clone)]
pub struct CollateralOutput {
    /// The unspent output.
    pub outpoint: Outpoint,
    /// Public key controlling it.
    pub pubkey: PubKey,
    /// Matching private key, for signing announces.
    pub privkey: SecretKey,
}

/// Wallet interface for collateral discovery and locking.
pub trait Wallet: Send + Sync {
    /// Whether the wallet is locked.
    fn is_locked(&self) -> bool;

    /// Confirmed balance in base units.
    fn balance(&self) -> u64;

    /// Find an unspent output holding exactly the collateral amount.
    fn select_collateral_output(&self) -> Result<CollateralOutput, WalletError>;

    /// Exclude an output from coin selection.
    fn lock_coin(&self, outpoint: &Outpoint);
}
