use serde::Serialize;
use shared_bus::KernelEvent;
use shared_crypto::SecretKey;
use shared_types::{unix_now, ResourceKey, StoreHealth};
use tracing::debug;

use super::{checksum_of, ControlStore};
use crate::domain::{
    journal_key, record_key, Checkpoint, CommitReceipt, JournalEntry, JournalKind, RecordMap,
    RecordOp, StoreError, StoreMeta, StoreResult, CHECKPOINT_KEY, JOURNAL_PREFIX, STATE_KEY,
};
use crate::ports::BatchOperation;

/// Staged record mutations, bound to the leadership generation observed at
/// `begin()`.
#[derive(Debug, Clone)]
pub struct Transaction {
    owner: ResourceKey,
    generation: u64,
    ops: Vec<RecordOp>,
}

impl Transaction {
    pub fn put(&mut self, path: impl Into<String>, value: Vec<u8>) {
        self.ops.push(RecordOp::Put {
            path: path.into(),
            value,
        });
    }

    pub fn put_json<T: Serialize>(&mut self, path: impl Into<String>, value: &T) -> StoreResult<()> {
        self.put(path, serde_json::to_vec(value)?);
        Ok(())
    }

    pub fn delete(&mut self, path: impl Into<String>) {
        self.ops.push(RecordOp::Delete { path: path.into() });
    }

    #[must_use]
    pub fn owner(&self) -> &ResourceKey {
        &self.owner
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn ops(&self) -> &[RecordOp] {
        &self.ops
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl ControlStore {
    /// Start a transaction on the kernel-owned store.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        let owner = ResourceKey::Kernel;
        Transaction {
            generation: self.inner.leadership.generation(&owner),
            owner,
            ops: Vec::new(),
        }
    }

    /// Commit `tx` atomically. A rejected commit writes nothing.
    ///
    /// Rejections, in check order: `NotLeader`, `Unhealthy`, `Locked`,
    /// `ReadOnly`.
    pub async fn commit(&self, tx: Transaction) -> StoreResult<CommitReceipt> {
        let _order = self.inner.write_order.lock().await;
        self.check_writable(&tx)?;

        let (key, mut records, meta) = {
            let state = self.inner.state.read();
            let key = state.key.clone().ok_or(StoreError::Locked)?;
            (key, state.records.clone(), state.meta.clone())
        };
        if tx.is_empty() {
            return Ok(CommitReceipt {
                revision: meta.revision,
                checksum: meta.checksum,
            });
        }

        for op in &tx.ops {
            op.apply(&mut records);
        }
        let checksum = checksum_of(&records);
        let revision = meta.revision + 1;

        let mut batch = Vec::with_capacity(tx.ops.len() + 3);
        for op in &tx.ops {
            let kv_key = record_key(op.path());
            match op {
                RecordOp::Put { value, .. } => {
                    let sealed = Self::seal_at(&key, &kv_key, value)?;
                    batch.push(BatchOperation::put(kv_key.into_bytes(), sealed));
                }
                RecordOp::Delete { .. } => batch.push(BatchOperation::delete(kv_key.into_bytes())),
            }
        }

        let entry = JournalEntry {
            revision,
            kind: JournalKind::Commit,
            ops: tx.ops,
            checksum_after: checksum.clone(),
            committed_at: unix_now(),
        };
        batch.push(self.journal_op(&key, &entry)?);

        let mut next = StoreMeta {
            revision,
            checksum: checksum.clone(),
            ..meta
        };
        if revision - next.checkpoint_revision >= self.inner.config.checkpoint_every {
            batch.extend(self.checkpoint_ops(&key, revision, &checksum, &records).await?);
            next.checkpoint_revision = revision;
        }
        batch.push(BatchOperation::put(STATE_KEY.as_bytes(), serde_json::to_vec(&next)?));

        self.write_batch(batch).await?;
        {
            let mut state = self.inner.state.write();
            state.records = records;
            state.meta = next;
        }

        debug!(revision, checksum = %checksum, "[hk-02] commit applied");
        self.inner
            .bus
            .publish(KernelEvent::ControlStoreCommit {
                revision,
                checksum: checksum.clone(),
            })
            .await;
        Ok(CommitReceipt { revision, checksum })
    }

    fn check_writable(&self, tx: &Transaction) -> StoreResult<()> {
        let leadership = &self.inner.leadership;
        if !leadership.is_leader(&tx.owner) {
            return Err(StoreError::NotLeader {
                resource: tx.owner.clone(),
                detail: "this member does not hold the role".to_string(),
            });
        }
        if leadership.generation(&tx.owner) != tx.generation {
            return Err(StoreError::NotLeader {
                resource: tx.owner.clone(),
                detail: "leadership changed since the transaction began".to_string(),
            });
        }

        let state = self.inner.state.read();
        if state.meta.health == StoreHealth::Degraded {
            return Err(StoreError::Unhealthy(
                state
                    .meta
                    .health_detail
                    .clone()
                    .unwrap_or_else(|| "integrity check failed".to_string()),
            ));
        }
        if state.key.is_none() {
            return Err(StoreError::Locked);
        }
        if state.import_pending {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }

    pub(super) fn journal_op(&self, key: &SecretKey, entry: &JournalEntry) -> StoreResult<BatchOperation> {
        let kv_key = journal_key(entry.revision);
        let sealed = Self::seal_at(key, &kv_key, &bincode::serialize(entry)?)?;
        Ok(BatchOperation::put(kv_key.into_bytes(), sealed))
    }

    /// Checkpoint at `revision` plus deletion of older journal entries.
    pub(super) async fn checkpoint_ops(
        &self,
        key: &SecretKey,
        revision: u64,
        checksum: &str,
        records: &RecordMap,
    ) -> StoreResult<Vec<BatchOperation>> {
        let checkpoint = Checkpoint {
            revision,
            checksum: checksum.to_string(),
            records: records.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let sealed = Self::seal_at(key, CHECKPOINT_KEY, &bincode::serialize(&checkpoint)?)?;

        let current = journal_key(revision);
        let mut ops = vec![BatchOperation::put(CHECKPOINT_KEY.as_bytes(), sealed)];
        ops.extend(
            self.scan_raw(JOURNAL_PREFIX)
                .await?
                .into_iter()
                .filter(|(kv_key, _)| kv_key.as_str() < current.as_str())
                .map(|(kv_key, _)| BatchOperation::delete(kv_key.into_bytes())),
        );
        debug!(revision, pruned = ops.len() - 1, "[hk-02] checkpoint written");
        Ok(ops)
    }
}
