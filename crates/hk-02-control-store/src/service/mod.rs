//! # Control Store Service
//!
//! ```text
//!  begin() ──→ Transaction ──commit()──→ leadership gate ──→ health gate
//!                                            │                    │
//!                                            ▼                    ▼
//!                                       NotLeader           StoreUnhealthy
//!                                                                 │
//!                                         Locked / ReadOnly ◄─────┤
//!                                                                 ▼
//!                       one sync batch: records + journal entry + meta/state
//!                                                                 │
//!                                                                 ▼
//!                                                  ControlStoreCommit{revision}
//! ```
//!
//! Plaintext records are cached in memory only while unlocked. Every path
//! that touches the backend for writing (commit, unlock, repair, restore)
//! holds `write_order`, so a verification scan never sees a half-applied
//! commit.

mod integrity;
mod snapshot;
mod transaction;

pub use transaction::Transaction;

use hk_01_leadership::RoleView;
use parking_lot::{Mutex, RwLock};
use shared_bus::{EventPublisher, KernelEvent};
use shared_crypto::{digest_entries, open, seal, SecretKey};
use shared_types::{Credential, StoreHealth};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{
    ControlStoreConfig, KVStoreError, RecordMap, StoreError, StoreMeta, StoreResult, VaultRecord,
    IMPORT_KEY, RECORD_PREFIX, STATE_KEY, VAULT_KEY,
};
use crate::ports::{BatchOperation, KeyValueStore};
use crate::vault::KeyVault;

type SharedKv = Arc<Mutex<Box<dyn KeyValueStore>>>;

struct StoreState {
    /// `None` while locked.
    key: Option<SecretKey>,
    records: RecordMap,
    meta: StoreMeta,
    import_pending: bool,
}

struct StoreInner {
    kv: SharedKv,
    leadership: Arc<dyn RoleView>,
    bus: Arc<dyn EventPublisher>,
    config: ControlStoreConfig,
    state: RwLock<StoreState>,
    write_order: tokio::sync::Mutex<()>,
}

/// Encrypted, journaled control-plane store. Cheap to clone.
#[derive(Clone)]
pub struct ControlStore {
    inner: Arc<StoreInner>,
}

/// Hex checksum over records in key order.
#[must_use]
pub fn checksum_of(records: &RecordMap) -> String {
    hex::encode(digest_entries(
        records.iter().map(|(path, value)| (path.as_bytes(), value.as_slice())),
    ))
}

impl ControlStore {
    /// Open a store over `kv`. The store starts locked.
    pub fn open(
        kv: impl KeyValueStore + 'static,
        leadership: Arc<dyn RoleView>,
        bus: Arc<dyn EventPublisher>,
        config: ControlStoreConfig,
    ) -> StoreResult<Self> {
        let meta = match kv.get(STATE_KEY.as_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => StoreMeta::empty(checksum_of(&RecordMap::new())),
        };
        let import_pending = kv.exists(IMPORT_KEY.as_bytes())?;

        info!(
            revision = meta.revision,
            health = %meta.health,
            import_pending,
            "[hk-02] control store opened (locked)"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                kv: Arc::new(Mutex::new(Box::new(kv))),
                leadership,
                bus,
                config,
                state: RwLock::new(StoreState {
                    key: None,
                    records: RecordMap::new(),
                    meta,
                    import_pending,
                }),
                write_order: tokio::sync::Mutex::new(()),
            }),
        })
    }

    // =========================================================================
    // STATE
    // =========================================================================

    #[must_use]
    pub fn config(&self) -> &ControlStoreConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.state.read().key.is_none()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.state.read().meta.revision
    }

    #[must_use]
    pub fn checksum(&self) -> String {
        self.inner.state.read().meta.checksum.clone()
    }

    #[must_use]
    pub fn health(&self) -> StoreHealth {
        self.inner.state.read().meta.health
    }

    #[must_use]
    pub fn health_detail(&self) -> Option<String> {
        self.inner.state.read().meta.health_detail.clone()
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.inner.state.read().import_pending
    }

    /// Store accepts commits (leadership aside).
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let state = self.inner.state.read();
        state.key.is_some() && state.meta.health == StoreHealth::Healthy && !state.import_pending
    }

    #[must_use]
    pub fn meta(&self) -> StoreMeta {
        self.inner.state.read().meta.clone()
    }

    // =========================================================================
    // LOCK / UNLOCK
    // =========================================================================

    /// Unlock with `passphrase`. The first unlock of an empty store creates
    /// the vault. A pending import completes here.
    pub async fn unlock(&self, passphrase: &Credential) -> StoreResult<()> {
        let _order = self.inner.write_order.lock().await;
        if !self.is_locked() {
            return Ok(());
        }

        let vault = self.kv_get(VAULT_KEY)?;
        let key = match vault {
            Some(bytes) => {
                let record: VaultRecord = serde_json::from_slice(&bytes)?;
                KeyVault::open(&record, passphrase).inspect_err(|_| {
                    warn!("[hk-02] unlock rejected: bad credential");
                })?
            }
            None => {
                let (record, key) = KeyVault::initialize(passphrase, self.inner.config.kdf_rounds)?;
                let meta = self.meta();
                self.write_batch(vec![
                    BatchOperation::put(VAULT_KEY.as_bytes(), serde_json::to_vec(&record)?),
                    BatchOperation::put(STATE_KEY.as_bytes(), serde_json::to_vec(&meta)?),
                ])
                .await?;
                info!("[hk-02] key vault initialized");
                key
            }
        };

        let (records, unreadable) = self.load_records(&key).await?;
        let actual = checksum_of(&records);
        let import_pending = {
            let mut state = self.inner.state.write();
            state.key = Some(key);
            state.records = records;
            state.import_pending
        };

        info!(revision = self.revision(), "[hk-02] control store unlocked");
        self.inner
            .bus
            .publish(KernelEvent::LockStateChanged { locked: false })
            .await;

        if import_pending {
            self.finish_import().await?;
        }

        let expected = self.checksum();
        if actual != expected || !unreadable.is_empty() {
            let detail = format!(
                "checksum mismatch on unlock (expected {expected}, found {actual}, {} unreadable)",
                unreadable.len()
            );
            self.mark_degraded(detail).await?;
        }
        Ok(())
    }

    /// Seal the store. Cached plaintext and the store key are dropped.
    pub async fn lock(&self) -> StoreResult<()> {
        let _order = self.inner.write_order.lock().await;
        let was_unlocked = {
            let mut state = self.inner.state.write();
            state.records.clear();
            state.key.take().is_some()
        };
        if was_unlocked {
            info!("[hk-02] control store locked");
            self.inner
                .bus
                .publish(KernelEvent::LockStateChanged { locked: true })
                .await;
        }
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Plaintext of the record at `path` (`<table>/<id>`).
    pub fn get(&self, path: &str) -> StoreResult<Option<Vec<u8>>> {
        let state = self.inner.state.read();
        if state.key.is_none() {
            return Err(StoreError::Locked);
        }
        Ok(state.records.get(path).cloned())
    }

    /// Records under `<table>/`, ordered by path.
    pub fn scan(&self, table: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let state = self.inner.state.read();
        if state.key.is_none() {
            return Err(StoreError::Locked);
        }
        let prefix = format!("{table}/");
        Ok(state
            .records
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn store_key(&self) -> StoreResult<SecretKey> {
        self.inner.state.read().key.clone().ok_or(StoreError::Locked)
    }

    fn kv_get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.kv.lock().get(key.as_bytes())?)
    }

    /// Apply `ops` atomically on the blocking pool.
    async fn write_batch(&self, ops: Vec<BatchOperation>) -> StoreResult<()> {
        let kv = self.inner.kv.clone();
        tokio::task::spawn_blocking(move || kv.lock().atomic_batch_write(ops))
            .await
            .map_err(|e| KVStoreError::IOError {
                message: format!("write task failed: {e}"),
            })??;
        Ok(())
    }

    async fn scan_raw(&self, prefix: &'static str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let kv = self.inner.kv.clone();
        let rows = tokio::task::spawn_blocking(move || kv.lock().prefix_scan(prefix.as_bytes()))
            .await
            .map_err(|e| KVStoreError::IOError {
                message: format!("scan task failed: {e}"),
            })??;
        Ok(rows
            .into_iter()
            .map(|(key, value)| (String::from_utf8_lossy(&key).into_owned(), value))
            .collect())
    }

    /// Decrypt every record. Returns readable records and unreadable paths.
    async fn load_records(&self, key: &SecretKey) -> StoreResult<(RecordMap, Vec<String>)> {
        let mut records = RecordMap::new();
        let mut unreadable = Vec::new();
        for (kv_key, sealed) in self.scan_raw(RECORD_PREFIX).await? {
            let path = kv_key.trim_start_matches(RECORD_PREFIX).to_string();
            match open(key, kv_key.as_bytes(), &sealed) {
                Ok(plaintext) => {
                    records.insert(path, plaintext);
                }
                Err(_) => unreadable.push(path),
            }
        }
        Ok((records, unreadable))
    }

    fn seal_at(key: &SecretKey, kv_key: &str, plaintext: &[u8]) -> StoreResult<Vec<u8>> {
        Ok(seal(key, kv_key.as_bytes(), plaintext)?)
    }

    fn open_at(key: &SecretKey, kv_key: &str, sealed: &[u8]) -> StoreResult<Vec<u8>> {
        open(key, kv_key.as_bytes(), sealed).map_err(|e| StoreError::Corrupted {
            key: kv_key.to_string(),
            detail: e.to_string(),
        })
    }

    /// Persist and publish a degraded state. Publishes only on change.
    async fn mark_degraded(&self, detail: String) -> StoreResult<()> {
        let meta = {
            let state = self.inner.state.read();
            if state.meta.health == StoreHealth::Degraded
                && state.meta.health_detail.as_deref() == Some(detail.as_str())
            {
                return Ok(());
            }
            StoreMeta {
                health: StoreHealth::Degraded,
                health_detail: Some(detail.clone()),
                ..state.meta.clone()
            }
        };
        self.write_batch(vec![BatchOperation::put(
            STATE_KEY.as_bytes(),
            serde_json::to_vec(&meta)?,
        )])
        .await?;
        self.inner.state.write().meta = meta;

        warn!(detail = %detail, "[hk-02] control store degraded");
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreHealth {
                status: StoreHealth::Degraded,
                detail: Some(detail),
            })
            .await;
        Ok(())
    }

    async fn mark_healthy(&self) -> StoreResult<()> {
        let meta = StoreMeta {
            health: StoreHealth::Healthy,
            health_detail: None,
            ..self.meta()
        };
        self.write_batch(vec![BatchOperation::put(
            STATE_KEY.as_bytes(),
            serde_json::to_vec(&meta)?,
        )])
        .await?;
        self.inner.state.write().meta = meta;

        info!("[hk-02] control store healthy");
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreHealth {
                status: StoreHealth::Healthy,
                detail: None,
            })
            .await;
        Ok(())
    }
}
