//! Logging bootstrap for hosts that do not bring their own subscriber.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber honoring `RUST_LOG`, defaulting to
/// `info` with `debug` for the enode crates.
///
/// Returns quietly if a global subscriber is already set, so embedding
/// hosts keep control of their own logging.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,enode_registry=debug,enode_payments=debug,enode_sync=debug")
    });
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
