//! Registry cache persistence.
//!
//! The registry snapshot is written as JSON with a version string up
//! front; loading a file with a different version clears everything
//! instead of guessing at field meanings.

use crate::index::DenseIndex;
use crate::record::Enode;
use crate::registry::{EnodeRegistry, SERIALIZATION_VERSION};
use enode_messages::{Announce, Ping};
use enode_types::{Hash256, NetAddr, Outpoint};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Cache I/O failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed cache contents.
    #[error("cache format: {0}")]
    Format(#[from] serde_json::Error),
}

/// On-disk form of the registry.
#[derive(Serialize, Deserialize)]
pub struct RegistryCache {
    version: String,
    enodes: Vec<Enode>,
    #[serde(with = "enode_types::serde_pairs")]
    asked_us_for_list: HashMap<NetAddr, i64>,
    #[serde(with = "enode_types::serde_pairs")]
    we_asked_for_list: HashMap<NetAddr, i64>,
    we_asked_for_entry: Vec<(Outpoint, Vec<(NetAddr, i64)>)>,
    recovery_requests: Vec<(Hash256, i64, HashSet<NetAddr>)>,
    recovery_good_replies: Vec<(Hash256, Vec<Announce>)>,
    last_watchdog_vote_time: i64,
    dsq_count: i64,
    seen_announces: Vec<(Hash256, i64, Announce)>,
    seen_pings: Vec<(Hash256, Ping)>,
    index: DenseIndex,
}

impl EnodeRegistry {
    /// Snapshot the registry into its cache form.
    pub fn to_cache(&self) -> RegistryCache {
        let inner = self.inner.read();
        RegistryCache {
            version: SERIALIZATION_VERSION.to_string(),
            enodes: inner.enodes.clone(),
            asked_us_for_list: inner.asked_us_for_list.clone(),
            we_asked_for_list: inner.we_asked_for_list.clone(),
            we_asked_for_entry: inner
                .we_asked_for_entry
                .iter()
                .map(|(op, per_peer)| (*op, per_peer.iter().map(|(a, t)| (*a, *t)).collect()))
                .collect(),
            recovery_requests: inner
                .recovery_requests
                .iter()
                .map(|(hash, (at, peers))| (*hash, *at, peers.clone()))
                .collect(),
            recovery_good_replies: inner
                .recovery_good_replies
                .iter()
                .map(|(hash, replies)| (*hash, replies.clone()))
                .collect(),
            last_watchdog_vote_time: inner.last_watchdog_vote_time,
            dsq_count: inner.dsq_count,
            seen_announces: inner
                .seen_announces
                .iter()
                .map(|(hash, (at, mnb))| (*hash, *at, mnb.clone()))
                .collect(),
            seen_pings: self
                .seen_pings
                .iter()
                .map(|entry| (*entry.key(), entry.value().clone()))
                .collect(),
            index: inner.index.clone(),
        }
    }

    /// Write the cache file.
    pub fn save_cache(&self, path: &Path) -> Result<(), CacheError> {
        let cache = self.to_cache();
        let json = serde_json::to_vec(&cache)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), enodes = cache.enodes.len(), "registry cache saved");
        Ok(())
    }

    /// Load a cache file, clearing everything on version mismatch.
    pub fn load_cache(&self, path: &Path) -> Result<(), CacheError> {
        let bytes = std::fs::read(path)?;
        let cache: RegistryCache = serde_json::from_slice(&bytes)?;

        if cache.version != SERIALIZATION_VERSION {
            warn!(
                found = %cache.version,
                expected = SERIALIZATION_VERSION,
                "registry cache version mismatch; starting clean"
            );
            self.clear();
            return Ok(());
        }

        let loaded = cache.enodes.len();
        {
            let mut inner = self.inner.write();
            inner.enodes = cache.enodes;
            inner.asked_us_for_list = cache.asked_us_for_list;
            inner.we_asked_for_list = cache.we_asked_for_list;
            inner.we_asked_for_entry = cache
                .we_asked_for_entry
                .into_iter()
                .map(|(op, per_peer)| (op, per_peer.into_iter().collect()))
                .collect();
            inner.recovery_requests = cache
                .recovery_requests
                .into_iter()
                .map(|(hash, at, peers)| (hash, (at, peers)))
                .collect();
            inner.recovery_good_replies = cache.recovery_good_replies.into_iter().collect();
            inner.last_watchdog_vote_time = cache.last_watchdog_vote_time;
            inner.dsq_count = cache.dsq_count;
            inner.seen_announces = cache
                .seen_announces
                .into_iter()
                .map(|(hash, at, mnb)| (hash, (at, mnb)))
                .collect();
            inner.index = cache.index;
            inner.index.rebuild_reverse();
        }
        self.seen_pings.clear();
        for (hash, ping) in cache.seen_pings {
            self.seen_pings.insert(hash, ping);
        }
        info!(path = %path.display(), enodes = loaded, "registry cache loaded");
        Ok(())
    }
}
