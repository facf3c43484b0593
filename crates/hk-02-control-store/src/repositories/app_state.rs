use serde::{Deserialize, Serialize};
use shared_types::{ClusterMode, RouteSpec};

use super::Table;
use crate::domain::{CommitReceipt, StoreResult};
use crate::service::{ControlStore, Transaction};

/// Desired state of one installed application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStateRecord {
    pub name: String,
    pub cluster_mode: ClusterMode,
    pub replication_factor: u8,
    pub desired_running: bool,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
}

impl AppStateRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, cluster_mode: ClusterMode) -> Self {
        Self {
            name: name.into(),
            cluster_mode,
            replication_factor: 1,
            desired_running: true,
            routes: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct AppStateRepository {
    table: Table<AppStateRecord>,
}

impl AppStateRepository {
    pub const TABLE: &'static str = "apps";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub fn get(&self, name: &str) -> StoreResult<Option<AppStateRecord>> {
        self.table.get(name)
    }

    pub fn list(&self) -> StoreResult<Vec<AppStateRecord>> {
        Ok(self.table.list()?.into_iter().map(|(_, app)| app).collect())
    }

    pub fn stage(&self, tx: &mut Transaction, app: &AppStateRecord) -> StoreResult<()> {
        self.table.stage_put(tx, &app.name, app)
    }

    pub async fn save(&self, app: &AppStateRecord) -> StoreResult<CommitReceipt> {
        self.table.put(&app.name, app).await
    }

    pub async fn remove(&self, name: &str) -> StoreResult<CommitReceipt> {
        self.table.delete(name).await
    }
}
