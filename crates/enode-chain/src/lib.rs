//! Interfaces to the host node.
//!
//! The enode subsystem sits on top of an existing full node. The
//! blockchain engine, the peer set, the wallet and the message-signing
//! primitives are all consumed through the traits in this crate; the
//! subsystem itself never touches disk blocks or sockets directly.

pub mod chain;
pub mod error;
pub mod identity;
pub mod net;
pub mod signer;
pub mod spork;
pub mod wallet;

pub use chain::{Chain, CoinbaseOutputs, TxOut};
pub use error::{ChainError, SignerError, WalletError};
pub use identity::{ActiveIdentity, SharedIdentity};
pub use net::{Net, PeerId};
pub use signer::{EcdsaSigner, Signer};
pub use spork::{min_payment_protocol, SporkId, SporkSet};
pub use wallet::{CollateralOutput, Wallet};
