use serde::{Deserialize, Serialize};

use super::Table;
use crate::domain::{CommitReceipt, StoreResult};
use crate::service::ControlStore;

/// A cluster member known to this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_id: String,
    pub name: String,
    /// Hex Ed25519 public key used to verify the device's relay tokens.
    pub public_key: String,
    pub addr: String,
    pub registered_at: u64,
}

#[derive(Clone)]
pub struct DeviceRegistryRepository {
    table: Table<DeviceRecord>,
}

impl DeviceRegistryRepository {
    pub const TABLE: &'static str = "devices";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub fn get(&self, device_id: &str) -> StoreResult<Option<DeviceRecord>> {
        self.table.get(device_id)
    }

    pub fn list(&self) -> StoreResult<Vec<DeviceRecord>> {
        Ok(self.table.list()?.into_iter().map(|(_, d)| d).collect())
    }

    pub async fn register(&self, device: &DeviceRecord) -> StoreResult<CommitReceipt> {
        self.table.put(&device.device_id, device).await
    }

    pub async fn remove(&self, device_id: &str) -> StoreResult<CommitReceipt> {
        self.table.delete(device_id).await
    }
}
