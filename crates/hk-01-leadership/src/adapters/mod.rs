//! Consensus strategies and lease arbiters.

mod lease_provider;
mod memory_arbiter;
mod single_node;

pub use lease_provider::{LeaseConfig, LeaseConsensusProvider};
pub use memory_arbiter::InMemoryLeaseArbiter;
pub use single_node::SingleNodeProvider;
