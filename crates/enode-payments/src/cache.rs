//! Payment store persistence.

use crate::engine::PaymentEngine;
use crate::payees::BlockPayees;
use enode_messages::PaymentVote;
use enode_types::{Hash256, Outpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Cache-format version for the vote store.
pub const PAYMENTS_CACHE_VERSION: &str = "EnodePayments-Version-1";

/// Cache I/O failures.
#[derive(Error, Debug)]
pub enum PaymentsCacheError {
    /// Filesystem failure.
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed cache contents.
    #[error("cache format: {0}")]
    Format(#[from] serde_json::Error),
}

/// On-disk form of the vote store.
#[derive(Serialize, Deserialize)]
pub struct PaymentsCache {
    version: String,
    votes: Vec<(Hash256, PaymentVote)>,
    blocks: Vec<(u32, BlockPayees)>,
    last_votes: Vec<(Outpoint, u32)>,
}

impl PaymentEngine {
    /// Write the vote store to disk.
    pub fn save_cache(&self, path: &Path) -> Result<(), PaymentsCacheError> {
        let cache = PaymentsCache {
            version: PAYMENTS_CACHE_VERSION.to_string(),
            votes: self.snapshot_votes(),
            blocks: self.snapshot_blocks(),
            last_votes: self.snapshot_last_votes(),
        };
        std::fs::write(path, serde_json::to_vec(&cache)?)?;
        info!(
            path = %path.display(),
            votes = cache.votes.len(),
            blocks = cache.blocks.len(),
            "payment cache saved"
        );
        Ok(())
    }

    /// Load the vote store, clearing on version mismatch.
    pub fn load_cache(&self, path: &Path) -> Result<(), PaymentsCacheError> {
        let bytes = std::fs::read(path)?;
        let cache: PaymentsCache = serde_json::from_slice(&bytes)?;
        if cache.version != PAYMENTS_CACHE_VERSION {
            warn!(
                found = %cache.version,
                expected = PAYMENTS_CACHE_VERSION,
                "payment cache version mismatch; starting clean"
            );
            self.clear();
            return Ok(());
        }
        let (votes, blocks) = (cache.votes.len(), cache.blocks.len());
        self.restore(cache.votes, cache.blocks, cache.last_votes);
        info!(path = %path.display(), votes, blocks, "payment cache loaded");
        Ok(())
    }
}
