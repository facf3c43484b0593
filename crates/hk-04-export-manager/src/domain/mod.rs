//! Bundle layout, manifest and archive formats.
//!
//! ```text
//!  <export_dir>/<kind>-<utc>-<id>/
//!      manifest.json          Manifest (written last)
//!      store.snapshot         bincode StoreSnapshot, records still sealed
//!      devices.json           device registry
//!      volumes/<name>.vol     bincode VolumeArchive (full_data only)
//! ```

mod error;

pub use error::{ExportError, ExportResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared_crypto::digest_entries;
use shared_types::{ExportKind, VolumeSpec};
use std::path::PathBuf;

/// Manifest format understood by this build.
pub const FORMAT_VERSION: u16 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SNAPSHOT_FILE: &str = "store.snapshot";
pub const DEVICES_FILE: &str = "devices.json";
pub const VOLUMES_DIR: &str = "volumes";

/// Magic bytes opening every volume archive.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"HKVA";

/// Largest single bundle entry accepted on import (8 GiB).
pub const MAX_ENTRY_SIZE: u64 = 8 * 1024 * 1024 * 1024;

/// One file of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the bundle root, `/`-separated.
    pub path: String,
    pub size: u64,
    /// Hex BLAKE3 of the file.
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u16,
    pub kind: ExportKind,
    pub created_at: DateTime<Utc>,
    pub store_revision: u64,
    pub store_checksum: String,
    pub entries: Vec<ManifestEntry>,
    /// Hex BLAKE3 over `(path, digest)` of every entry in order.
    pub checksum: String,
}

impl Manifest {
    #[must_use]
    pub fn new(
        kind: ExportKind,
        created_at: DateTime<Utc>,
        store_revision: u64,
        store_checksum: String,
        entries: Vec<ManifestEntry>,
    ) -> Self {
        let checksum = Self::checksum_of(&entries);
        Self {
            format_version: FORMAT_VERSION,
            kind,
            created_at,
            store_revision,
            store_checksum,
            entries,
            checksum,
        }
    }

    #[must_use]
    pub fn checksum_of(entries: &[ManifestEntry]) -> String {
        hex::encode(digest_entries(
            entries
                .iter()
                .map(|e| (e.path.as_bytes(), e.digest.as_bytes())),
        ))
    }

    #[must_use]
    pub fn entry(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Volume archives listed in the manifest.
    pub fn volume_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries
            .iter()
            .filter(|e| e.path.starts_with(VOLUMES_DIR))
    }
}

/// File inside a volume archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedFile {
    /// Relative, `/`-separated, no `..`.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Contents of one application volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeArchive {
    pub magic: [u8; 4],
    pub spec: VolumeSpec,
    pub files: Vec<ArchivedFile>,
}

/// Where a finished export landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    pub export_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("/var/lib/hearth/exports"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, digest: &str) -> ManifestEntry {
        ManifestEntry {
            path: path.into(),
            size: 1,
            digest: digest.into(),
        }
    }

    #[test]
    fn test_checksum_covers_order_and_digests() {
        let a = vec![entry("a", "01"), entry("b", "02")];
        let b = vec![entry("b", "02"), entry("a", "01")];
        let c = vec![entry("a", "01"), entry("b", "03")];
        assert_ne!(Manifest::checksum_of(&a), Manifest::checksum_of(&b));
        assert_ne!(Manifest::checksum_of(&a), Manifest::checksum_of(&c));

        let manifest = Manifest::new(ExportKind::ControlOnly, Utc::now(), 3, "x".into(), a.clone());
        assert_eq!(manifest.checksum, Manifest::checksum_of(&a));
        assert_eq!(manifest.format_version, FORMAT_VERSION);
    }
}
