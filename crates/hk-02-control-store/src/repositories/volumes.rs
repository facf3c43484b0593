use shared_types::VolumeSpec;

use super::Table;
use crate::domain::{CommitReceipt, StoreResult};
use crate::service::ControlStore;

/// Persistent catalog of non-bootstrap volumes.
#[derive(Clone)]
pub struct VolumeCatalogRepository {
    table: Table<VolumeSpec>,
}

impl VolumeCatalogRepository {
    pub const TABLE: &'static str = "volumes";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub fn get(&self, name: &str) -> StoreResult<Option<VolumeSpec>> {
        self.table.get(name)
    }

    pub fn list(&self) -> StoreResult<Vec<VolumeSpec>> {
        Ok(self.table.list()?.into_iter().map(|(_, spec)| spec).collect())
    }

    pub async fn save(&self, spec: &VolumeSpec) -> StoreResult<CommitReceipt> {
        self.table.put(&spec.name, spec).await
    }

    pub async fn remove(&self, name: &str) -> StoreResult<CommitReceipt> {
        self.table.delete(name).await
    }
}
