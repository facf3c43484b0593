use serde::{Deserialize, Serialize};
use shared_types::unix_now;

use super::Table;
use crate::domain::{CommitReceipt, StoreResult};
use crate::service::{ControlStore, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence: u64,
    pub at: u64,
    pub actor: String,
    pub action: String,
    pub detail: String,
}

/// Append-only audit log. Entries are keyed by a zero-padded sequence so
/// listing returns them in order.
#[derive(Clone)]
pub struct AuditRepository {
    table: Table<AuditEntry>,
}

impl AuditRepository {
    pub const TABLE: &'static str = "audit";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    /// Stage an entry. The sequence is the revision the commit will get.
    pub fn stage(&self, tx: &mut Transaction, actor: &str, action: &str, detail: &str) -> StoreResult<()> {
        let sequence = self.table.store().revision() + 1;
        let entry = AuditEntry {
            sequence,
            at: unix_now(),
            actor: actor.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
        };
        self.table.stage_put(tx, &format!("{sequence:020}"), &entry)
    }

    pub async fn append(&self, actor: &str, action: &str, detail: &str) -> StoreResult<CommitReceipt> {
        let mut tx = self.table.store().begin();
        self.stage(&mut tx, actor, action, detail)?;
        self.table.store().commit(tx).await
    }

    /// The most recent `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let all = self.table.list()?;
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).map(|(_, entry)| entry).collect())
    }
}
