//! Per-volume directories under a data root.
//!
//! ```text
//!  <root>/<class>/<name>/data       volume contents
//!  <root>/<class>/<name>/.keycheck  keyed digest of the volume name
//! ```
//!
//! Read-only mounts strip write permission from `data`.

use parking_lot::RwLock;
use shared_crypto::{Blake3Hasher, SecretKey};
use shared_types::{MountMode, VolumeSpec};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ports::{MountBackend, MountError};

const DATA_DIR: &str = "data";
const KEYCHECK_FILE: &str = ".keycheck";

pub struct DirectoryMountBackend {
    root: PathBuf,
    mounts: RwLock<HashMap<String, (MountMode, PathBuf)>>,
}

impl DirectoryMountBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mounts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Contents directory of `spec`, mounted or not.
    #[must_use]
    pub fn data_dir(&self, spec: &VolumeSpec) -> PathBuf {
        self.volume_dir(spec).join(DATA_DIR)
    }

    fn volume_dir(&self, spec: &VolumeSpec) -> PathBuf {
        self.root.join(spec.class.to_string()).join(&spec.name)
    }

    fn check_key(&self, spec: &VolumeSpec, key: &SecretKey) -> Result<(), MountError> {
        let digest = Blake3Hasher::new_keyed(key.as_bytes())
            .update(spec.name.as_bytes())
            .finalize_hex();
        let path = self.volume_dir(spec).join(KEYCHECK_FILE);
        match fs::read_to_string(&path) {
            Ok(existing) if existing.trim() == digest => Ok(()),
            Ok(_) => Err(MountError::KeyMismatch),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::write(&path, digest)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn set_writable(path: &Path, writable: bool) -> Result<(), MountError> {
    let mut perms = fs::metadata(path)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        perms.set_mode(if writable { 0o755 } else { 0o555 });
    }
    #[cfg(not(unix))]
    perms.set_readonly(!writable);
    fs::set_permissions(path, perms)?;
    Ok(())
}

impl MountBackend for DirectoryMountBackend {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn mount(&self, spec: &VolumeSpec, mode: MountMode, key: Option<&SecretKey>) -> Result<PathBuf, MountError> {
        if mode == MountMode::Denied {
            return Err(MountError::InvalidMode(mode));
        }
        let data = self.data_dir(spec);
        fs::create_dir_all(&data)?;
        if let Some(key) = key {
            self.check_key(spec, key)?;
        }
        set_writable(&data, mode == MountMode::ReadWrite)?;

        debug!(volume = %spec.name, %mode, path = %data.display(), "[hk-03] directory mounted");
        self.mounts
            .write()
            .insert(spec.name.clone(), (mode, data.clone()));
        Ok(data)
    }

    fn unmount(&self, name: &str) -> Result<(), MountError> {
        if let Some((_, path)) = self.mounts.write().remove(name) {
            // Leave contents writable for the next mount or an export.
            if path.exists() {
                set_writable(&path, true)?;
            }
        }
        Ok(())
    }

    fn mounted_mode(&self, name: &str) -> Option<MountMode> {
        self.mounts.read().get(name).map(|(mode, _)| *mode)
    }

    fn data_path(&self, spec: &VolumeSpec) -> Option<PathBuf> {
        Some(self.data_dir(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{VolumeClass, VolumeOptions};

    fn spec() -> VolumeSpec {
        VolumeSpec::new("blog-data", VolumeClass::Application, VolumeOptions::for_app("blog"))
    }

    #[test]
    fn test_read_only_mount_strips_write_permission() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryMountBackend::new(dir.path());

        let path = backend.mount(&spec(), MountMode::ReadWrite, None).unwrap();
        assert!(!fs::metadata(&path).unwrap().permissions().readonly());
        assert_eq!(path, dir.path().join("application/blog-data/data"));

        backend.mount(&spec(), MountMode::ReadOnly, None).unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
        assert_eq!(backend.mounted_mode("blog-data"), Some(MountMode::ReadOnly));

        backend.unmount("blog-data").unwrap();
        backend.unmount("blog-data").unwrap();
        assert_eq!(backend.mounted_mode("blog-data"), None);
    }

    #[test]
    fn test_denied_is_not_mountable() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryMountBackend::new(dir.path());
        assert_eq!(
            backend.mount(&spec(), MountMode::Denied, None),
            Err(MountError::InvalidMode(MountMode::Denied))
        );
    }

    #[test]
    fn test_key_check() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryMountBackend::new(dir.path());
        let boot = VolumeSpec::new("keys", VolumeClass::Bootstrap, VolumeOptions::default());
        let key = SecretKey::generate();

        backend.mount(&boot, MountMode::ReadWrite, Some(&key)).unwrap();
        backend.unmount("keys").unwrap();
        backend.mount(&boot, MountMode::ReadWrite, Some(&key)).unwrap();
        assert_eq!(
            backend.mount(&boot, MountMode::ReadWrite, Some(&SecretKey::generate())),
            Err(MountError::KeyMismatch)
        );
    }
}
