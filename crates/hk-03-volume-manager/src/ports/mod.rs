//! Ports of the volume manager.

use shared_crypto::SecretKey;
use shared_types::{MountMode, VolumeSpec};
use std::io;
use std::path::{Path, PathBuf};

/// Mount layer. Enforces the mode it is given: a read-only mount must
/// refuse writes.
pub trait MountBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mount `spec` in `mode`, returning its path. Mounting an already
    /// mounted volume switches it to `mode`.
    ///
    /// `key` is given for bootstrap volumes; a volume first mounted under a
    /// key refuses any other key.
    fn mount(&self, spec: &VolumeSpec, mode: MountMode, key: Option<&SecretKey>) -> Result<PathBuf, MountError>;

    /// Idempotent.
    fn unmount(&self, name: &str) -> Result<(), MountError>;

    fn mounted_mode(&self, name: &str) -> Option<MountMode>;

    /// Where the contents of `spec` live on disk, if anywhere.
    fn data_path(&self, _spec: &VolumeSpec) -> Option<PathBuf> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MountError {
    #[error("mode {0} cannot be mounted")]
    InvalidMode(MountMode),

    #[error("volume key does not match")]
    KeyMismatch,

    #[error("mount I/O error: {message}")]
    IOError { message: String },
}

impl From<io::Error> for MountError {
    fn from(err: io::Error) -> Self {
        MountError::IOError {
            message: err.to_string(),
        }
    }
}

/// Free/total space of a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub available: u64,
    pub total: u64,
}

/// Filesystem space queries, so disk monitoring can be tested.
pub trait SpaceProbe: Send + Sync {
    fn space(&self, path: &Path) -> io::Result<DiskSpace>;
}
