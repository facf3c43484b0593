//! # Control Store (hk-02)
//!
//! Encrypted, journaled control-plane state. Only the kernel leader commits.
//!
//! ## Layout
//!
//! ```text
//!  meta/vault        wrapped store key (passphrase-derived master key)
//!  meta/state        revision, checksum, health
//!  meta/checkpoint   sealed full snapshot at a journal revision
//!  meta/import       present while an imported snapshot awaits unlock
//!  rec/<table>/<id>  sealed record
//!  wal/<revision>    sealed journal entry
//! ```
//!
//! ## Commit Gates (checked in order)
//!
//! 1. Kernel leadership, generation unchanged since `begin()` → `NotLeader`
//! 2. Store health → `StoreUnhealthy`
//! 3. Lock state → `Locked`
//! 4. Import mode → `ReadOnly`
//!
//! A rejected commit writes nothing. An accepted one writes records, the
//! journal entry and the new state in one synchronous batch.
//!
//! ## Repair
//!
//! Rebuild from checkpoint + journal first; failing that, keep what still
//! decrypts and stay degraded until the operator acknowledges the loss.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod health;
pub mod ports;
pub mod repositories;
pub mod service;
pub mod vault;

pub use adapters::InMemoryKVStore;
#[cfg(feature = "rocksdb")]
pub use adapters::{RocksDbConfig, RocksDbStore};
pub use domain::{
    CommitReceipt, ControlStoreConfig, IntegrityReport, KVStoreError, RecordOp, RepairOutcome,
    StoreError, StoreMeta, StoreResult, StoreSnapshot,
};
pub use health::{CheckOutcome, StoreHealthMonitor};
pub use ports::{BatchOperation, KeyValueStore};
pub use repositories::{
    AppStateRecord, AppStateRepository, AuditEntry, AuditRepository, AuthRepository, DeviceRecord,
    DeviceRegistryRepository, RemoteConfig, RemoteConfigRepository, SecretsRepository, Table,
    UserRecord, VolumeCatalogRepository,
};
pub use service::{checksum_of, ControlStore, Transaction};
pub use vault::KeyVault;
