//! Enode registry: records, lifecycle, election and PoSe verification.
//!
//! The [`EnodeRegistry`] is the single authority for enode records.
//! Validation entry points return `(accepted, dos_score)` pairs; the
//! node layer applies scores to peers. All time-dependent operations
//! take explicit `now` timestamps so behavior is reproducible in tests.

pub mod cache;
pub mod election;
pub mod index;
pub mod record;
pub mod registry;
pub mod verify;

pub use cache::{CacheError, RegistryCache};
pub use index::DenseIndex;
pub use record::{CheckContext, Enode, EnodeState};
pub use registry::{
    EnodeRegistry, RegistryEvent, RECOVERY_MAX_ASK_ENTRIES, RECOVERY_QUORUM_REQUIRED,
    RECOVERY_QUORUM_TOTAL, RECOVERY_RETRY_SECONDS, RECOVERY_WAIT_SECONDS, SERIALIZATION_VERSION,
};
pub use verify::{
    MAX_POSE_CONNECTIONS, MAX_POSE_RANK, VERIFY_BROADCAST_REQUIRES_VALID_SIGS,
};
