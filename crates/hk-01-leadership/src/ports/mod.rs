//! Ports of the leadership registry.
//!
//! - [`ConsensusProvider`]: strategy that decides roles and writes them
//!   through the registry's [`RoleWriter`](crate::RoleWriter)
//! - [`LeaseArbiter`]: quorum stand-in granting time-bounded leases
//! - [`RoleView`]: read-only role queries for other kernel crates
//! - [`TimeSource`]: wall clock, replaceable in tests

mod arbiter;
mod provider;
mod time;
mod view;

pub use arbiter::LeaseArbiter;
pub use provider::ConsensusProvider;
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use view::RoleView;
