//! Host-interface error types.

use thiserror::Error;

/// Failures reading chain state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The requested height is not on the active chain.
    #[error("no block at height {0}")]
    UnknownHeight(u32),

    /// The requested block hash is unknown.
    #[error("unknown block hash")]
    UnknownBlock,

    /// The outpoint is absent from the UTXO set.
    #[error("outpoint not found")]
    OutpointNotFound,

    /// Chain state is busy; retry later without penalizing anyone.
    #[error("chain state unavailable")]
    Unavailable,
}

/// Failures from the wallet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Wallet is locked and cannot hand out keys.
    #[error("wallet is locked")]
    Locked,

    /// No unspent output of the collateral denomination exists.
    #[error("no collateral output available")]
    NoCollateral,

    /// The named outpoint is not controlled by this wallet.
    #[error("outpoint not owned by wallet")]
    NotOwned,
}

/// Failures from the message signer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// Key material was rejected by the backend.
    #[error("invalid key")]
    InvalidKey,

    /// Signing failed.
    #[error("signing failed: {0}")]
    SignFailed(String),

    /// The signature does not verify under the given key and message.
    #[error("signature verification failed")]
    BadSignature,
}
