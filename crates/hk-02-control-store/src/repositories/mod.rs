//! Typed repositories over the control store.
//!
//! Each repository owns one table (`<table>/<id>` record paths) and stores
//! JSON documents. `stage_*` methods add to a caller's transaction so
//! several repositories can change atomically; the plain methods commit on
//! their own.

mod app_state;
mod audit;
mod auth;
mod devices;
mod remote_config;
mod secrets;
mod volumes;

pub use app_state::{AppStateRecord, AppStateRepository};
pub use audit::{AuditEntry, AuditRepository};
pub use auth::{AuthRepository, UserRecord};
pub use devices::{DeviceRecord, DeviceRegistryRepository};
pub use remote_config::{RemoteConfig, RemoteConfigRepository};
pub use secrets::SecretsRepository;
pub use volumes::VolumeCatalogRepository;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

use crate::domain::{CommitReceipt, StoreError, StoreResult};
use crate::service::{ControlStore, Transaction};

/// JSON documents under one table.
pub struct Table<T> {
    store: ControlStore,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Table<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Table<T> {
    pub fn new(store: ControlStore, name: &'static str) -> Self {
        Self {
            store,
            name,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn store(&self) -> &ControlStore {
        &self.store
    }

    fn path(&self, id: &str) -> String {
        format!("{}/{id}", self.name)
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<T>> {
        self.store
            .get(&self.path(id))?
            .map(|bytes| decode(&self.path(id), &bytes))
            .transpose()
    }

    /// Every `(id, document)` in id order.
    pub fn list(&self) -> StoreResult<Vec<(String, T)>> {
        let prefix_len = self.name.len() + 1;
        self.store
            .scan(self.name)?
            .into_iter()
            .map(|(path, bytes)| {
                let doc = decode(&path, &bytes)?;
                Ok((path[prefix_len..].to_string(), doc))
            })
            .collect()
    }

    pub fn stage_put(&self, tx: &mut Transaction, id: &str, doc: &T) -> StoreResult<()> {
        tx.put_json(self.path(id), doc)
    }

    pub fn stage_delete(&self, tx: &mut Transaction, id: &str) {
        tx.delete(self.path(id));
    }

    pub async fn put(&self, id: &str, doc: &T) -> StoreResult<CommitReceipt> {
        let mut tx = self.store.begin();
        self.stage_put(&mut tx, id, doc)?;
        self.store.commit(tx).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<CommitReceipt> {
        let mut tx = self.store.begin();
        self.stage_delete(&mut tx, id);
        self.store.commit(tx).await
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Corrupted {
        key: path.to_string(),
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::harness;
    use shared_types::{ClusterMode, VolumeClass, VolumeOptions, VolumeSpec};

    #[tokio::test]
    async fn test_table_put_get_list_delete() {
        let h = harness().await;
        let apps = AppStateRepository::new(h.store.clone());

        apps.save(&AppStateRecord::new("photos", ClusterMode::Stateful)).await.unwrap();
        apps.save(&AppStateRecord::new("notes", ClusterMode::StatelessReadOnly)).await.unwrap();

        let names: Vec<_> = apps.list().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["notes", "photos"]);
        assert_eq!(
            apps.get("photos").unwrap().unwrap().cluster_mode,
            ClusterMode::Stateful
        );

        apps.remove("photos").await.unwrap();
        assert!(apps.get("photos").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_staged_writes_share_one_revision() {
        let h = harness().await;
        let apps = AppStateRepository::new(h.store.clone());
        let audit = AuditRepository::new(h.store.clone());
        let before = h.store.revision();

        let mut tx = h.store.begin();
        apps.stage(&mut tx, &AppStateRecord::new("photos", ClusterMode::Stateful)).unwrap();
        audit.stage(&mut tx, "operator", "install", "photos").unwrap();
        let receipt = h.store.commit(tx).await.unwrap();

        assert_eq!(receipt.revision, before + 1);
        let tail = audit.tail(10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].sequence, receipt.revision);
    }

    #[tokio::test]
    async fn test_audit_tail_is_ordered() {
        let h = harness().await;
        let audit = AuditRepository::new(h.store.clone());
        for action in ["a", "b", "c"] {
            audit.append("operator", action, "").await.unwrap();
        }
        let actions: Vec<_> = audit.tail(2).unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_password_verification() {
        let h = harness().await;
        let auth = AuthRepository::new(h.store.clone());
        auth.create_user("admin", "hunter2", true).await.unwrap();

        assert!(auth.verify_password("admin", "hunter2").unwrap());
        assert!(!auth.verify_password("admin", "hunter3").unwrap());
        assert!(!auth.verify_password("nobody", "hunter2").unwrap());
        assert!(matches!(
            auth.create_user("admin", "x", false).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_volume_key_issued_once() {
        let h = harness().await;
        let secrets = SecretsRepository::new(h.store.clone());
        assert!(secrets.volume_key("vault").unwrap().is_none());

        let first = secrets.ensure_volume_key("vault").await.unwrap();
        let second = secrets.ensure_volume_key("vault").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(secrets.names().unwrap(), vec!["volume-key.vault"]);
        assert_eq!(secrets.keyed_volumes().unwrap(), vec!["vault"]);
    }

    #[tokio::test]
    async fn test_volume_catalog_roundtrip() {
        let h = harness().await;
        let catalog = VolumeCatalogRepository::new(h.store.clone());
        let spec = VolumeSpec::new("media", VolumeClass::Application, VolumeOptions::for_app("photos"));
        catalog.save(&spec).await.unwrap();
        assert_eq!(catalog.get("media").unwrap(), Some(spec));
        assert_eq!(catalog.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_refused_while_locked() {
        let h = harness().await;
        let remote = RemoteConfigRepository::new(h.store.clone());
        h.store.lock().await.unwrap();
        assert_eq!(remote.get(), Err(StoreError::Locked));
    }
}
