//! Collateral outpoints.

use crate::{Hash256, TypeError};
use serde::{Deserialize, Serialize};

/// A transaction output reference: txid plus output index.
///
/// The short string form `<txid-hex>-<n>` is what signed message
/// strings embed, so it must stay stable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Outpoint {
    /// Transaction id of the funding transaction.
    pub txid: Hash256,
    /// Output index within that transaction.
    pub index: u32,
}

impl Outpoint {
    /// Create from parts.
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// True for the default (null) outpoint used in whole-list requests.
    pub fn is_null(&self) -> bool {
        *self == Outpoint::default()
    }

    /// Short form used in signed message strings: `<txid>-<n>`.
    pub fn to_string_short(&self) -> String {
        format!("{}-{}", self.txid.to_hex(), self.index)
    }

    /// Parse the short form.
    pub fn from_string_short(s: &str) -> Result<Self, TypeError> {
        let (txid, index) = s
            .rsplit_once('-')
            .ok_or_else(|| TypeError::InvalidHex(format!("bad outpoint {s}")))?;
        Ok(Self {
            txid: Hash256::from_hex(txid)?,
            index: index
                .parse()
                .map_err(|_| TypeError::InvalidHex(format!("bad outpoint index {index}")))?,
        })
    }
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_short())
    }
}

impl std::fmt::Debug for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Outpoint({})", self.to_string_short())
    }
}
