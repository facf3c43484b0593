use serde::{Deserialize, Serialize};

use super::Table;
use crate::domain::{CommitReceipt, StoreResult};
use crate::service::ControlStore;

const CURRENT: &str = "current";

/// Relay enrolment of this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub relay_addr: String,
    pub device_id: String,
    /// Public hostnames the relay routes to this installation.
    pub hostnames: Vec<String>,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct RemoteConfigRepository {
    table: Table<RemoteConfig>,
}

impl RemoteConfigRepository {
    pub const TABLE: &'static str = "remote";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub fn get(&self) -> StoreResult<Option<RemoteConfig>> {
        self.table.get(CURRENT)
    }

    pub async fn set(&self, config: &RemoteConfig) -> StoreResult<CommitReceipt> {
        self.table.put(CURRENT, config).await
    }

    pub async fn clear(&self) -> StoreResult<CommitReceipt> {
        self.table.delete(CURRENT).await
    }
}
