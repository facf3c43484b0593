//! Domain types for the control store.
//!
//! ## Key Layout
//!
//! | Prefix            | Contents                                  | Sealed |
//! |-------------------|-------------------------------------------|--------|
//! | `rec/<table>/<id>`| Repository records                        | yes    |
//! | `wal/<revision>`  | Journal entries, one per commit           | yes    |
//! | `meta/state`      | Revision, checksum, health                | no     |
//! | `meta/vault`      | Salt and wrapped store key                | no     |
//! | `meta/checkpoint` | Full record snapshot at a revision        | yes    |
//! | `meta/import`     | Present while an import awaits unlock     | no     |

mod error;

pub use error::{KVStoreError, StoreError, StoreResult};

use serde::{Deserialize, Serialize};
use shared_types::StoreHealth;
use std::collections::BTreeMap;
use std::time::Duration;

pub const RECORD_PREFIX: &str = "rec/";
pub const JOURNAL_PREFIX: &str = "wal/";
pub const META_PREFIX: &str = "meta/";
pub const STATE_KEY: &str = "meta/state";
pub const VAULT_KEY: &str = "meta/vault";
pub const CHECKPOINT_KEY: &str = "meta/checkpoint";
pub const IMPORT_KEY: &str = "meta/import";

/// Detail attached to a store left degraded by a lossy repair.
pub const RECOVERED_DETAIL: &str = "recovered with data loss";

/// Plaintext records keyed by `<table>/<id>`.
pub type RecordMap = BTreeMap<String, Vec<u8>>;

#[must_use]
pub fn record_key(path: &str) -> String {
    format!("{RECORD_PREFIX}{path}")
}

#[must_use]
pub fn journal_key(revision: u64) -> String {
    format!("{JOURNAL_PREFIX}{revision:020}")
}

/// Tunables for the control store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlStoreConfig {
    /// Journal entries between checkpoints.
    pub checkpoint_every: u64,
    /// Passphrase stretching rounds for new vaults.
    pub kdf_rounds: u32,
    /// Interval of the background integrity check.
    pub health_interval: Duration,
    /// Run `repair()` when the integrity check fails.
    pub auto_repair: bool,
}

impl Default for ControlStoreConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 64,
            kdf_rounds: 10_000,
            health_interval: Duration::from_secs(60),
            auto_repair: true,
        }
    }
}

impl ControlStoreConfig {
    /// Cheap settings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            checkpoint_every: 8,
            kdf_rounds: 2,
            health_interval: Duration::from_millis(50),
            auto_repair: true,
        }
    }
}

/// One mutation inside a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOp {
    Put { path: String, value: Vec<u8> },
    Delete { path: String },
}

impl RecordOp {
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Put { path, .. } | Self::Delete { path } => path,
        }
    }

    pub fn apply(&self, records: &mut RecordMap) {
        match self {
            Self::Put { path, value } => {
                records.insert(path.clone(), value.clone());
            }
            Self::Delete { path } => {
                records.remove(path);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalKind {
    Commit,
    /// Written by a lossy repair; `ops` lists the dropped records.
    Recovery,
}

/// Write-ahead journal entry, sealed under the store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub revision: u64,
    pub kind: JournalKind,
    pub ops: Vec<RecordOp>,
    /// Hex checksum of all records after applying `ops`.
    pub checksum_after: String,
    pub committed_at: u64,
}

/// Full record set at one revision, sealed under the store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub revision: u64,
    pub checksum: String,
    pub records: Vec<(String, Vec<u8>)>,
}

/// Persisted store state, readable while locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub revision: u64,
    pub checksum: String,
    pub health: StoreHealth,
    pub health_detail: Option<String>,
    pub checkpoint_revision: u64,
}

impl StoreMeta {
    #[must_use]
    pub fn empty(checksum: String) -> Self {
        Self {
            revision: 0,
            checksum,
            health: StoreHealth::Healthy,
            health_detail: None,
            checkpoint_revision: 0,
        }
    }
}

/// Key vault header: the store key wrapped by a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub version: u8,
    pub salt: String,
    pub rounds: u32,
    pub wrapped_key: String,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub revision: u64,
    pub checksum: String,
}

/// Outcome of `verify_integrity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub revision: u64,
    pub expected: String,
    pub actual: String,
    /// Record paths that failed to decrypt or decode.
    pub unreadable: Vec<String>,
}

impl IntegrityReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.expected == self.actual && self.unreadable.is_empty()
    }
}

/// How `repair` restored the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairOutcome {
    /// Journal replay reproduced the committed state.
    Rebuilt { revision: u64 },
    /// Unreadable records were dropped; the store stays degraded until
    /// the loss is acknowledged.
    Recovered { revision: u64, dropped: Vec<String> },
}

/// Raw, still-sealed store contents used by export and import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub revision: u64,
    pub checksum: String,
    pub entries: Vec<(String, Vec<u8>)>,
}
