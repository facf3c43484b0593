//! # Leadership Registry (hk-01)
//!
//! Answers one question for the rest of the kernel: what role does this
//! member hold for a resource right now?
//!
//! ## Roles
//!
//! | Role           | Writable volumes | Workloads | Control store writes |
//! |----------------|------------------|-----------|----------------------|
//! | `Leader`       | yes              | yes       | yes (kernel only)    |
//! | `FollowerWarm` | read-only        | read-only | no                   |
//! | `FollowerCold` | none             | none      | no                   |
//!
//! ## Architecture
//!
//! ```text
//!  ┌───────────────────────────────────────────────┐
//!  │                  Leadership                   │
//!  │  register / failover          (Component)     │
//!  │       │                                       │
//!  │       ▼                                       │
//!  │  ┌──────────────────┐   RoleWriter   ┌──────┐ │
//!  │  │ ConsensusProvider│ ─────────────→ │ Reg. │ │──→ LeadershipRoleChanged
//!  │  │  single-node     │                └──────┘ │
//!  │  │  lease ──────────┼──→ LeaseArbiter         │
//!  │  └──────────────────┘                         │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Unregistered resources read as `FollowerCold` (fail closed).
//! - Stateless resources are pinned to `FollowerWarm` at registration and
//!   never reach the provider.
//! - A leader that cannot renew its lease keeps the role until the deadline;
//!   past it the role reads as `FollowerCold` even before the provider
//!   publishes the demotion.
//! - Every transition increments the resource's generation; the control
//!   store compares generations to catch a demotion mid-transaction.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::{InMemoryLeaseArbiter, LeaseConfig, LeaseConsensusProvider, SingleNodeProvider};
pub use domain::{
    Lease, LeaseGrant, LeadershipError, LeadershipResult, MemberId, RoleEntry, RoleUpdate,
};
pub use ports::{
    ConsensusProvider, LeaseArbiter, ManualTimeSource, RoleView, SystemTimeSource, TimeSource,
};
pub use service::{Leadership, LeadershipRegistry, RoleWriter};
