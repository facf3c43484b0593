//! Integrity verification and repair.
//!
//! Repair order:
//! 1. Rebuild: replay the journal from the last checkpoint. If it reproduces
//!    the committed revision and checksum, rewrite all records. Store becomes
//!    healthy.
//! 2. Recover: drop unreadable records, adopt the resulting checksum, journal
//!    the loss and checkpoint. Store stays degraded until the loss is
//!    acknowledged.

use shared_bus::KernelEvent;
use shared_crypto::SecretKey;
use shared_types::{unix_now, StoreHealth};
use tracing::{info, warn};

use super::{checksum_of, ControlStore};
use crate::domain::{
    record_key, Checkpoint, IntegrityReport, JournalEntry, JournalKind, RecordMap, RecordOp,
    RepairOutcome, StoreError, StoreMeta, StoreResult, CHECKPOINT_KEY, JOURNAL_PREFIX,
    RECORD_PREFIX, RECOVERED_DETAIL, STATE_KEY,
};
use crate::ports::BatchOperation;

impl ControlStore {
    /// Re-read every record from the backend and compare against the
    /// committed checksum. Marks the store degraded on mismatch.
    pub async fn verify_integrity(&self) -> StoreResult<IntegrityReport> {
        let _order = self.inner.write_order.lock().await;
        let key = self.store_key()?;
        let (records, unreadable) = self.load_records(&key).await?;
        let meta = self.meta();

        let report = IntegrityReport {
            revision: meta.revision,
            expected: meta.checksum,
            actual: checksum_of(&records),
            unreadable,
        };
        if !report.is_ok() {
            let detail = if report.unreadable.is_empty() {
                format!("checksum mismatch at revision {}", report.revision)
            } else {
                format!(
                    "{} unreadable record(s) at revision {}",
                    report.unreadable.len(),
                    report.revision
                )
            };
            self.mark_degraded(detail).await?;
        }
        Ok(report)
    }

    /// Restore a consistent state after a failed integrity check.
    pub async fn repair(&self) -> StoreResult<RepairOutcome> {
        let _order = self.inner.write_order.lock().await;
        let key = self.store_key()?;
        let meta = self.meta();

        match self.rebuild_from_journal(&key, &meta).await {
            Ok(records) => self.adopt_rebuilt(&key, meta, records).await,
            Err(e) => {
                warn!(error = %e, "[hk-02] journal replay failed, recovering readable records");
                self.recover_readable(&key, meta).await
            }
        }
    }

    /// Clear a degraded state left by a lossy repair. Fails while the
    /// store still does not verify.
    pub async fn acknowledge_recovery(&self) -> StoreResult<()> {
        if self.health() == StoreHealth::Healthy {
            return Ok(());
        }
        let report = self.verify_integrity().await?;
        if !report.is_ok() {
            return Err(StoreError::Unhealthy(
                "store does not verify; run repair first".to_string(),
            ));
        }
        let _order = self.inner.write_order.lock().await;
        info!(revision = report.revision, "[hk-02] recovery acknowledged");
        self.mark_healthy().await
    }

    async fn rebuild_from_journal(&self, key: &SecretKey, meta: &StoreMeta) -> StoreResult<RecordMap> {
        let (mut records, mut revision) = match self.kv_get(CHECKPOINT_KEY)? {
            Some(sealed) => {
                let checkpoint: Checkpoint =
                    bincode::deserialize(&Self::open_at(key, CHECKPOINT_KEY, &sealed)?)?;
                let records: RecordMap = checkpoint.records.into_iter().collect();
                if checksum_of(&records) != checkpoint.checksum {
                    return Err(StoreError::Corrupted {
                        key: CHECKPOINT_KEY.to_string(),
                        detail: "checkpoint checksum mismatch".to_string(),
                    });
                }
                (records, checkpoint.revision)
            }
            None => (RecordMap::new(), 0),
        };

        for (kv_key, sealed) in self.scan_raw(JOURNAL_PREFIX).await? {
            let entry: JournalEntry = bincode::deserialize(&Self::open_at(key, &kv_key, &sealed)?)?;
            if entry.revision <= revision {
                continue;
            }
            if entry.revision != revision + 1 {
                return Err(StoreError::Corrupted {
                    key: kv_key,
                    detail: format!("journal gap after revision {revision}"),
                });
            }
            for op in &entry.ops {
                op.apply(&mut records);
            }
            if checksum_of(&records) != entry.checksum_after {
                return Err(StoreError::Corrupted {
                    key: kv_key,
                    detail: "replayed checksum mismatch".to_string(),
                });
            }
            revision = entry.revision;
        }

        if revision != meta.revision || checksum_of(&records) != meta.checksum {
            return Err(StoreError::Corrupted {
                key: JOURNAL_PREFIX.to_string(),
                detail: format!(
                    "journal reaches revision {revision}, committed revision is {}",
                    meta.revision
                ),
            });
        }
        Ok(records)
    }

    async fn adopt_rebuilt(
        &self,
        key: &SecretKey,
        meta: StoreMeta,
        records: RecordMap,
    ) -> StoreResult<RepairOutcome> {
        let mut batch: Vec<BatchOperation> = self
            .scan_raw(RECORD_PREFIX)
            .await?
            .into_iter()
            .filter(|(kv_key, _)| !records.contains_key(kv_key.trim_start_matches(RECORD_PREFIX)))
            .map(|(kv_key, _)| BatchOperation::delete(kv_key.into_bytes()))
            .collect();
        for (path, value) in &records {
            let kv_key = record_key(path);
            let sealed = Self::seal_at(key, &kv_key, value)?;
            batch.push(BatchOperation::put(kv_key.into_bytes(), sealed));
        }
        let revision = meta.revision;
        let next = StoreMeta {
            health: StoreHealth::Healthy,
            health_detail: None,
            ..meta
        };
        batch.push(BatchOperation::put(STATE_KEY.as_bytes(), serde_json::to_vec(&next)?));
        self.write_batch(batch).await?;
        {
            let mut state = self.inner.state.write();
            state.records = records;
            state.meta = next;
        }

        info!(revision, "[hk-02] store rebuilt from journal");
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreHealth {
                status: StoreHealth::Healthy,
                detail: None,
            })
            .await;
        Ok(RepairOutcome::Rebuilt { revision })
    }

    async fn recover_readable(&self, key: &SecretKey, meta: StoreMeta) -> StoreResult<RepairOutcome> {
        let (records, dropped) = self.load_records(key).await?;
        let checksum = checksum_of(&records);
        let revision = meta.revision + 1;

        let mut batch: Vec<BatchOperation> = dropped
            .iter()
            .map(|path| BatchOperation::delete(record_key(path).into_bytes()))
            .collect();
        let entry = JournalEntry {
            revision,
            kind: JournalKind::Recovery,
            ops: dropped
                .iter()
                .map(|path| RecordOp::Delete { path: path.clone() })
                .collect(),
            checksum_after: checksum.clone(),
            committed_at: unix_now(),
        };
        batch.push(self.journal_op(key, &entry)?);
        batch.extend(self.checkpoint_ops(key, revision, &checksum, &records).await?);

        let next = StoreMeta {
            revision,
            checksum: checksum.clone(),
            health: StoreHealth::Degraded,
            health_detail: Some(RECOVERED_DETAIL.to_string()),
            checkpoint_revision: revision,
        };
        batch.push(BatchOperation::put(STATE_KEY.as_bytes(), serde_json::to_vec(&next)?));
        self.write_batch(batch).await?;
        {
            let mut state = self.inner.state.write();
            state.records = records;
            state.meta = next;
        }

        warn!(revision, dropped = dropped.len(), "[hk-02] store recovered with data loss");
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreHealth {
                status: StoreHealth::Degraded,
                detail: Some(RECOVERED_DETAIL.to_string()),
            })
            .await;
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreCommit { revision, checksum })
            .await;
        Ok(RepairOutcome::Recovered { revision, dropped })
    }
}
