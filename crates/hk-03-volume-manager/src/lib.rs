//! # Volume Manager (hk-03)
//!
//! Owns the attach/detach lifecycle of every volume and keeps mounts in line
//! with leadership.
//!
//! ## Invariants
//!
//! | # | Invariant | Enforcement |
//! |---|-----------|-------------|
//! | 1 | Read-write only on the owner's leader | `allowed_mode` before every mount |
//! | 2 | Never silently downgraded | attach above the allowed mode → `Denied` |
//! | 3 | Create is idempotent | identical spec → `Exists`, different → `Conflict` |
//! | 4 | Bootstrap volumes stay local | keyed from the control store, skipped by reconciliation |
//!
//! ## Architecture
//!
//! ```text
//!  LeadershipRoleChanged ──→ VolumeReconciler ──→ VolumeManager::reconcile
//!                                                       │
//!  attach/detach (dispatcher) ─────────────────────────┤
//!                                                       ▼
//!                                     MountBackend (directory | memory)
//!
//!  DiskMonitor ── SpaceProbe (fs2) ──→ DiskEvent
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod disk;
pub mod domain;
pub mod ports;
pub mod reconciler;
pub mod service;

pub use adapters::{DirectoryMountBackend, Fs2SpaceProbe, InMemoryMountBackend, MockSpaceProbe};
pub use disk::DiskMonitor;
pub use domain::{
    allowed_mode, Attachment, CreateOutcome, VolumeConfig, VolumeError, VolumeResult, VolumeState,
};
pub use ports::{DiskSpace, MountBackend, MountError, SpaceProbe};
pub use reconciler::VolumeReconciler;
pub use service::VolumeManager;
