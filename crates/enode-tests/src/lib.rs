//! Integration and property tests for the enode subsystem.
//!
//! The [`harness`] module provides deterministic mock implementations
//! of the host interfaces; [`generators`] builds valid announces and
//! fully wired component stacks on top of them. The test modules cover
//! the end-to-end scenarios and the cross-component invariants that
//! in-crate unit tests cannot reach.

pub mod generators;
pub mod harness;

#[cfg(test)]
mod activation_tests;
#[cfg(test)]
mod election_tests;
#[cfg(test)]
mod node_tests;
#[cfg(test)]
mod payment_tests;
#[cfg(test)]
mod pose_tests;
#[cfg(test)]
mod property_tests;
