//! # Export Manager (hk-04)
//!
//! Portable bundles of the control plane, for reinstating a node
//! (`control_only`) or standalone disaster recovery (`full_data`).
//!
//! ## Rules
//!
//! - Exports are refused while the control store is degraded.
//! - Records stay sealed inside the bundle; only the original passphrase
//!   opens an imported store.
//! - Every file is listed in the manifest with its BLAKE3 digest, and the
//!   manifest carries a checksum over the list. Import verifies both.
//! - Import leaves the store locked and read-only; unlock completes it.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod archive;
pub mod domain;
pub mod service;

pub use archive::verify_bundle;
pub use domain::{
    ExportConfig, ExportError, ExportOutcome, ExportResult, Manifest, ManifestEntry, FORMAT_VERSION,
};
pub use service::ExportManager;
