use parking_lot::RwLock;
use shared_crypto::{blake3_hash, SecretKey};
use shared_types::{MountMode, VolumeSpec};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::ports::{MountBackend, MountError};

/// Mount table without a filesystem.
#[derive(Debug, Default)]
pub struct InMemoryMountBackend {
    mounts: RwLock<HashMap<String, MountMode>>,
    /// Key digests survive unmount, like a key check block on disk.
    keys: RwLock<HashMap<String, [u8; 32]>>,
}

impl InMemoryMountBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mounted(&self) -> Vec<(String, MountMode)> {
        let mut out: Vec<_> = self
            .mounts
            .read()
            .iter()
            .map(|(name, mode)| (name.clone(), *mode))
            .collect();
        out.sort();
        out
    }
}

impl MountBackend for InMemoryMountBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn mount(&self, spec: &VolumeSpec, mode: MountMode, key: Option<&SecretKey>) -> Result<PathBuf, MountError> {
        if mode == MountMode::Denied {
            return Err(MountError::InvalidMode(mode));
        }
        if let Some(digest) = key.map(|k| blake3_hash(k.as_bytes())) {
            let mut keys = self.keys.write();
            match keys.get(&spec.name) {
                Some(existing) if *existing != digest => return Err(MountError::KeyMismatch),
                Some(_) => {}
                None => {
                    keys.insert(spec.name.clone(), digest);
                }
            }
        }
        self.mounts.write().insert(spec.name.clone(), mode);
        Ok(PathBuf::from(format!("/mem/{}", spec.name)))
    }

    fn unmount(&self, name: &str) -> Result<(), MountError> {
        self.mounts.write().remove(name);
        Ok(())
    }

    fn mounted_mode(&self, name: &str) -> Option<MountMode> {
        self.mounts.read().get(name).copied()
    }
}
