//! Node-level configuration.

use enode_active::ActiveConfig;
use enode_types::NetworkParams;
use std::path::PathBuf;

/// Configuration for the whole subsystem.
#[derive(Clone)]
pub struct NodeConfig {
    /// Network parameters.
    pub params: NetworkParams,
    /// Where the registry and payment caches live.
    pub data_dir: PathBuf,
    /// Activation settings for running as an enode.
    pub active: ActiveConfig,
}

impl NodeConfig {
    /// Cache file for the registry.
    pub fn registry_cache_path(&self) -> PathBuf {
        self.data_dir.join("encache.json")
    }

    /// Cache file for the payment votes.
    pub fn payments_cache_path(&self) -> PathBuf {
        self.data_dir.join("enpayments.json")
    }
}
