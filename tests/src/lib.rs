//! # Hearth Kernel Test Suite
//!
//! Cross-module properties that no single crate can check alone.
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs         # multi-member fixtures
//!     ├── single_writer.rs   # one committer per instant (proptest)
//!     ├── store_integrity.rs # revisions, checksums, degraded store
//!     ├── volumes.rs         # mode table, idempotent create
//!     ├── leadership.rs      # stateless resources never elect
//!     ├── routing.rs         # no-route refusal
//!     └── kernel.rs          # full graph through the dispatcher
//! ```
//!
//! ```bash
//! cargo test -p hk-tests
//! cargo test -p hk-tests integration::single_writer
//! ```

#![allow(dead_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod integration;
