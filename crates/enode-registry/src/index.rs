//! Dense outpoint index.
//!
//! Maps outpoints to small integers and back. The mapping is add-only
//! and expected to be permanent; it is only rebuilt when it outgrows
//! both the expected maximum and the live registry.

use enode_types::Outpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Forward and reverse index between outpoints and dense integers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenseIndex {
    size: usize,
    #[serde(with = "enode_types::serde_pairs")]
    forward: HashMap<Outpoint, usize>,
    #[serde(skip)]
    reverse: HashMap<usize, Outpoint>,
}

impl DenseIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed outpoints.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Index of an outpoint, if known.
    pub fn get_index(&self, outpoint: &Outpoint) -> Option<usize> {
        self.forward.get(outpoint).copied()
    }

    /// Outpoint at an index, if known.
    pub fn get_outpoint(&self, index: usize) -> Option<Outpoint> {
        self.reverse.get(&index).copied()
    }

    /// Add an outpoint; no-op if already present.
    pub fn insert(&mut self, outpoint: Outpoint) {
        if self.forward.contains_key(&outpoint) {
            return;
        }
        let next = self.size;
        self.forward.insert(outpoint, next);
        self.reverse.insert(next, outpoint);
        self.size += 1;
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
        self.size = 0;
    }

    /// Restore the reverse map after deserialization.
    pub fn rebuild_reverse(&mut self) {
        self.size = self.forward.len();
        self.reverse = self
            .forward
            .iter()
            .map(|(outpoint, index)| (*index, *outpoint))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enode_types::sha256d;

    fn op(n: u8) -> Outpoint {
        Outpoint::new(sha256d(&[n]), 0)
    }

    #[test]
    fn insert_is_idempotent_and_dense() {
        let mut index = DenseIndex::new();
        index.insert(op(1));
        index.insert(op(2));
        index.insert(op(1));
        assert_eq!(index.len(), 2);
        assert_eq!(index.get_index(&op(1)), Some(0));
        assert_eq!(index.get_index(&op(2)), Some(1));
        assert_eq!(index.get_outpoint(1), Some(op(2)));
        assert_eq!(index.get_outpoint(5), None);
    }

    #[test]
    fn reverse_map_survives_serde() {
        let mut index = DenseIndex::new();
        index.insert(op(1));
        index.insert(op(2));

        let json = serde_json::to_string(&index).unwrap();
        let mut restored: DenseIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.get_outpoint(0), None);
        restored.rebuild_reverse();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get_outpoint(0), Some(op(1)));
    }
}
