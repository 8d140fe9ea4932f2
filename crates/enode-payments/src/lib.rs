//! Payment election and vote aggregation for enodes.
//!
//! Collects signed winner votes per block height, produces the local
//! node's votes when it is top-ranked, supplies the block producer with
//! the required payout and validates inbound coinbases against the
//! tally.

pub mod cache;
pub mod engine;
pub mod payees;

pub use cache::{PaymentsCache, PaymentsCacheError, PAYMENTS_CACHE_VERSION};
pub use engine::{
    PaymentEngine, SCHEDULE_LOOKAHEAD, VOTE_FUTURE_LIMIT, VOTE_TARGET_OFFSET,
};
pub use payees::{BlockPayees, Payee};
