//! Raw snapshots for export, and import mode.

use shared_bus::KernelEvent;
use shared_types::StoreHealth;
use tracing::info;

use super::ControlStore;
use crate::domain::{
    StoreError, StoreMeta, StoreResult, StoreSnapshot, IMPORT_KEY, JOURNAL_PREFIX, META_PREFIX,
    RECORD_PREFIX, STATE_KEY, VAULT_KEY,
};
use crate::ports::BatchOperation;

impl ControlStore {
    /// Copy of every persisted entry, still sealed. Refused while degraded.
    ///
    /// Restoring it on another node and unlocking with the same passphrase
    /// reproduces this store.
    pub async fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let _order = self.inner.write_order.lock().await;
        let meta = self.meta();
        if meta.health == StoreHealth::Degraded {
            return Err(StoreError::Unhealthy(
                meta.health_detail
                    .unwrap_or_else(|| "integrity check failed".to_string()),
            ));
        }

        let mut entries = Vec::new();
        for prefix in [META_PREFIX, RECORD_PREFIX, JOURNAL_PREFIX] {
            entries.extend(
                self.scan_raw(prefix)
                    .await?
                    .into_iter()
                    .filter(|(kv_key, _)| kv_key != IMPORT_KEY),
            );
        }
        Ok(StoreSnapshot {
            revision: meta.revision,
            checksum: meta.checksum,
            entries,
        })
    }

    /// Replace all contents with `snapshot` and lock the store in import
    /// mode. Commits fail with `ReadOnly` until the next unlock.
    pub async fn restore_snapshot(&self, snapshot: StoreSnapshot) -> StoreResult<()> {
        let _order = self.inner.write_order.lock().await;

        let state_bytes = snapshot
            .entries
            .iter()
            .find(|(kv_key, _)| kv_key == STATE_KEY)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| StoreError::Serialization("snapshot has no store state".to_string()))?;
        if !snapshot.entries.iter().any(|(kv_key, _)| kv_key == VAULT_KEY) {
            return Err(StoreError::Serialization("snapshot has no key vault".to_string()));
        }
        let meta: StoreMeta = serde_json::from_slice(&state_bytes)?;
        if meta.revision != snapshot.revision || meta.checksum != snapshot.checksum {
            return Err(StoreError::Conflict(format!(
                "snapshot header revision {} does not match its state (revision {})",
                snapshot.revision, meta.revision
            )));
        }

        let mut batch: Vec<BatchOperation> = Vec::new();
        for prefix in [META_PREFIX, RECORD_PREFIX, JOURNAL_PREFIX] {
            batch.extend(
                self.scan_raw(prefix)
                    .await?
                    .into_iter()
                    .map(|(kv_key, _)| BatchOperation::delete(kv_key.into_bytes())),
            );
        }
        for (kv_key, value) in snapshot.entries {
            if ![META_PREFIX, RECORD_PREFIX, JOURNAL_PREFIX]
                .iter()
                .any(|prefix| kv_key.starts_with(prefix))
            {
                return Err(StoreError::Serialization(format!("unexpected snapshot key {kv_key}")));
            }
            batch.push(BatchOperation::put(kv_key.into_bytes(), value));
        }
        batch.push(BatchOperation::put(IMPORT_KEY.as_bytes(), b"1".to_vec()));
        self.write_batch(batch).await?;

        let was_unlocked = {
            let mut state = self.inner.state.write();
            state.records.clear();
            state.meta = meta;
            state.import_pending = true;
            state.key.take().is_some()
        };

        info!(revision = snapshot.revision, "[hk-02] snapshot restored, awaiting unlock");
        if was_unlocked {
            self.inner
                .bus
                .publish(KernelEvent::LockStateChanged { locked: true })
                .await;
        }
        Ok(())
    }

    /// Make the store read-only until `complete_import`.
    pub async fn enter_import_mode(&self) -> StoreResult<()> {
        let _order = self.inner.write_order.lock().await;
        self.write_batch(vec![BatchOperation::put(IMPORT_KEY.as_bytes(), b"1".to_vec())])
            .await?;
        self.inner.state.write().import_pending = true;
        info!("[hk-02] import mode entered");
        Ok(())
    }

    /// Leave import mode. Requires the store to be unlocked.
    pub async fn complete_import(&self) -> StoreResult<()> {
        let _order = self.inner.write_order.lock().await;
        self.finish_import().await
    }

    pub(super) async fn finish_import(&self) -> StoreResult<()> {
        if self.is_locked() {
            return Err(StoreError::Locked);
        }
        if !self.is_read_only() {
            return Ok(());
        }
        self.write_batch(vec![BatchOperation::delete(IMPORT_KEY.as_bytes())])
            .await?;
        self.inner.state.write().import_pending = false;
        info!(revision = self.revision(), "[hk-02] import completed");
        Ok(())
    }
}
