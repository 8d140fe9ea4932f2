//! Core types shared across the enode subsystem.
//!
//! Everything here is plain data: transaction outpoints, hash digests,
//! compressed public keys, canonical payment scripts, network addresses
//! and the per-network parameter set. No I/O and no locking.

pub mod error;
pub mod hash;
pub mod keys;
pub mod netaddr;
pub mod outpoint;
pub mod params;
pub mod score;
pub mod script;
pub mod serde_pairs;

pub use error::TypeError;
pub use hash::{hash160, sha256d, Hash256, KeyId};
pub use keys::{PubKey, SecretKey};
pub use netaddr::NetAddr;
pub use outpoint::Outpoint;
pub use params::{Network, NetworkParams};
pub use score::{compact_from_score, score_distance};
pub use script::PayScript;

/// Base units per coin.
pub const COIN: u64 = 100_000_000;

/// Collateral locked by every enode, in coin units.
pub const COLLATERAL_COINS: u64 = 1_000;

/// Collateral locked by every enode, in base units.
pub const COLLATERAL_AMOUNT: u64 = COLLATERAL_COINS * COIN;

/// Lifecycle check throttle.
pub const CHECK_SECONDS: i64 = 5;

/// Minimum interval between two announces from the same enode.
pub const MIN_ANNOUNCE_SECONDS: i64 = 5 * 60;

/// Minimum interval between two pings, and the pre-enable grace period.
pub const MIN_PING_SECONDS: i64 = 10 * 60;

/// No ping for this long marks an enode expired.
pub const EXPIRATION_SECONDS: i64 = 65 * 60;

/// Watchdog freshness bound.
pub const WATCHDOG_MAX_SECONDS: i64 = 120 * 60;

/// No ping for this long requires a fresh announce.
pub const NEW_START_REQUIRED_SECONDS: i64 = 180 * 60;

/// Announce timestamps may run at most this far ahead of local time.
pub const FUTURE_SIG_TIME_SLACK: i64 = 60 * 60;

/// PoSe score magnitude cap; reaching +cap bans, -cap means verified.
pub const POSE_BAN_MAX_SCORE: i32 = 5;

/// Votes needed before a payee is enforced in coinbase validation.
pub const PAYMENT_SIGNATURES_REQUIRED: usize = 6;

/// Top ranks allowed to cast payment votes.
pub const PAYMENT_SIGNATURES_TOTAL: usize = 10;

/// Rate-limit window for whole-list and per-entry registry asks.
pub const DSEG_UPDATE_SECONDS: i64 = 3 * 60 * 60;

/// Maximum entries per GETDATA-style inventory batch.
pub const MAX_INV_SZ: usize = 50_000;
