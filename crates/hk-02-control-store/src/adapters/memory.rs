use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::KVStoreError;
use crate::ports::{BatchOperation, KeyValueStore};

/// In-memory ordered key-value store.
///
/// Clones share the same data, so two simulated members can sit on one
/// backing store.
#[derive(Clone, Default)]
pub struct InMemoryKVStore {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Overwrite a raw value, bypassing sealing. Used to simulate corruption.
    pub fn tamper(&self, key: &[u8], f: impl FnOnce(&mut Vec<u8>)) -> bool {
        match self.data.write().get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        // One write guard for the whole batch.
        let mut data = self.data.write();
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.read().contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KVStoreError> {
        Ok(self
            .data
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_scan_ordered() {
        let mut kv = InMemoryKVStore::new();
        kv.put(b"wal/2", b"b").unwrap();
        kv.put(b"wal/1", b"a").unwrap();
        kv.put(b"rec/x", b"c").unwrap();

        let keys: Vec<Vec<u8>> = kv.prefix_scan(b"wal/").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"wal/1".to_vec(), b"wal/2".to_vec()]);
    }

    #[test]
    fn test_clones_share_data() {
        let mut a = InMemoryKVStore::new();
        let b = a.clone();
        a.atomic_batch_write(vec![
            BatchOperation::put(b"k".to_vec(), b"v".to_vec()),
            BatchOperation::delete(b"missing".to_vec()),
        ])
        .unwrap();
        assert_eq!(b.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(b.tamper(b"k", |v| v[0] ^= 0xff));
        assert_ne!(a.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
