//! Read-only view of the host blockchain.

use crate::ChainError;
use enode_types::{Hash256, Outpoint, PayScript};

/// One transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Value in base units.
    pub value: u64,
    /// Destination script.
    pub script: PayScript,
}

/// The coinbase of a block, as far as payee validation cares.
#[derive(Debug, Clone, Default)]
pub struct CoinbaseOutputs {
    /// Sum of all coinbase output values.
    pub total_value: u64,
    /// The outputs themselves.
    pub outputs: Vec<TxOut>,
}

impl CoinbaseOutputs {
    /// True when some output pays `script` exactly `value`.
    pub fn pays(&self, script: &PayScript, value: u64) -> bool {
        self.outputs
            .iter()
            .any(|out| out.value == value && &out.script == script)
    }
}

/// Blockchain engine interface.
///
/// Implementations must answer from the active chain only. Any method
/// may return [`ChainError::Unavailable`] when the chain-state lock
/// cannot be taken; callers treat that as a deferral, never a failure.
pub trait Chain: Send + Sync {
    /// Height of the current tip, if any block is connected.
    fn tip_height(&self) -> Option<u32>;

    /// Hash of the block at `height` on the active chain.
    fn block_hash_at(&self, height: u32) -> Result<Hash256, ChainError>;

    /// Timestamp of the block at `height`.
    fn block_time_at(&self, height: u32) -> Result<i64, ChainError>;

    /// Coinbase outputs of the block at `height`.
    fn coinbase_at(&self, height: u32) -> Result<CoinbaseOutputs, ChainError>;

    /// Look up an unspent output.
    fn coins_get(&self, outpoint: &Outpoint) -> Result<TxOut, ChainError>;

    /// Height of the block containing `txid`.
    fn height_of_tx(&self, txid: &Hash256) -> Result<u32, ChainError>;

    /// Height of a block hash on the active chain.
    fn height_of_block(&self, hash: &Hash256) -> Result<u32, ChainError>;

    /// Whether initial block download is behind us.
    fn is_synced(&self) -> bool;

    /// Network-adjusted wall-clock time in seconds.
    fn adjusted_time(&self) -> i64;
}

/// Confirmations of an outpoint's funding transaction at the given tip.
///
/// Returns `None` while the transaction is unconfirmed or unknown.
pub fn collateral_confirmations(
    chain: &dyn Chain,
    outpoint: &Outpoint,
) -> Result<Option<u32>, ChainError> {
    let tip = match chain.tip_height() {
        Some(tip) => tip,
        None => return Ok(None),
    };
    match chain.height_of_tx(&outpoint.txid) {
        Ok(height) => Ok(Some(tip.saturating_sub(height) + 1)),
        Err(ChainError::UnknownBlock | ChainError::OutpointNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}
