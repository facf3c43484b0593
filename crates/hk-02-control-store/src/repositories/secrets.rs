use serde::{Deserialize, Serialize};
use shared_crypto::SecretKey;

use super::Table;
use crate::domain::{CommitReceipt, StoreError, StoreResult};
use crate::service::ControlStore;

const VOLUME_KEY_PREFIX: &str = "volume-key.";

#[derive(Serialize, Deserialize)]
struct SecretDoc {
    value: String,
}

/// Named secrets, including per-volume encryption keys.
///
/// Values are hex in the record; the record itself is sealed like any other.
#[derive(Clone)]
pub struct SecretsRepository {
    table: Table<SecretDoc>,
}

impl SecretsRepository {
    pub const TABLE: &'static str = "secrets";

    pub fn new(store: ControlStore) -> Self {
        Self {
            table: Table::new(store, Self::TABLE),
        }
    }

    pub fn get(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        self.table
            .get(name)?
            .map(|doc| hex::decode(doc.value).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()
    }

    pub async fn put(&self, name: &str, value: &[u8]) -> StoreResult<CommitReceipt> {
        self.table
            .put(name, &SecretDoc { value: hex::encode(value) })
            .await
    }

    pub fn names(&self) -> StoreResult<Vec<String>> {
        Ok(self.table.list()?.into_iter().map(|(name, _)| name).collect())
    }

    /// Key of `volume`, if one was issued.
    pub fn volume_key(&self, volume: &str) -> StoreResult<Option<SecretKey>> {
        self.get(&Self::volume_key_name(volume))?
            .map(|bytes| SecretKey::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    /// Key of `volume`, issuing and committing a new one if absent.
    pub async fn ensure_volume_key(&self, volume: &str) -> StoreResult<SecretKey> {
        if let Some(key) = self.volume_key(volume)? {
            return Ok(key);
        }
        let key = SecretKey::generate();
        self.put(&Self::volume_key_name(volume), key.as_bytes()).await?;
        Ok(key)
    }

    /// Volumes that have a key, in name order.
    pub fn keyed_volumes(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .names()?
            .into_iter()
            .filter_map(|name| name.strip_prefix(VOLUME_KEY_PREFIX).map(str::to_string))
            .collect())
    }

    fn volume_key_name(volume: &str) -> String {
        format!("{VOLUME_KEY_PREFIX}{volume}")
    }
}
