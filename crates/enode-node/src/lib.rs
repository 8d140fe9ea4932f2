//! Service wiring for the enode subsystem.
//!
//! [`Services`] replaces the original's global singletons: one value
//! constructed at startup, holding every component, passed explicitly
//! to whoever needs it. The host node feeds it wire messages and tip
//! notifications; tokio tasks drive the periodic ticks.

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod services;

pub use config::NodeConfig;
pub use logging::init_tracing;
pub use services::Services;
