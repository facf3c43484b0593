//! Volume archives and bundle file I/O. Everything here blocks.

use shared_crypto::blake3_hex;
use shared_types::VolumeSpec;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::domain::{
    ArchivedFile, ExportError, ExportResult, Manifest, ManifestEntry, VolumeArchive, ARCHIVE_MAGIC,
    FORMAT_VERSION, MANIFEST_FILE, MAX_ENTRY_SIZE,
};

/// Archive every regular file under `root`, in path order.
pub fn pack_volume(spec: &VolumeSpec, root: &Path) -> ExportResult<VolumeArchive> {
    let mut files = Vec::new();
    if root.exists() {
        collect(root, root, &mut files)?;
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(VolumeArchive {
        magic: ARCHIVE_MAGIC,
        spec: spec.clone(),
        files,
    })
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<ArchivedFile>) -> ExportResult<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect(root, &path, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| ExportError::Io(e.to_string()))?;
            out.push(ArchivedFile {
                path: to_slash(relative),
                bytes: fs::read(&path)?,
            });
        }
    }
    Ok(())
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve an archived path under `root`, refusing anything that escapes it.
fn safe_join(root: &Path, relative: &str) -> ExportResult<PathBuf> {
    let candidate = Path::new(relative);
    let escapes = relative.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(ExportError::InvalidBundle(format!("unsafe archive path '{relative}'")));
    }
    Ok(root.join(candidate))
}

/// Write the archive's files under `root`. Existing files are replaced.
pub fn unpack_volume(archive: &VolumeArchive, root: &Path) -> ExportResult<usize> {
    if archive.magic != ARCHIVE_MAGIC {
        return Err(ExportError::InvalidBundle(format!(
            "volume archive {} has bad magic",
            archive.spec.name
        )));
    }
    for file in &archive.files {
        let dest = safe_join(root, &file.path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &file.bytes)?;
    }
    Ok(archive.files.len())
}

/// Write `bytes` to `<bundle>/<relative>` and describe it.
pub fn write_entry(bundle: &Path, relative: &str, bytes: &[u8]) -> ExportResult<ManifestEntry> {
    let dest = safe_join(bundle, relative)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&dest, bytes)?;
    Ok(ManifestEntry {
        path: relative.to_string(),
        size: bytes.len() as u64,
        digest: blake3_hex(bytes),
    })
}

/// Read an entry listed in the manifest, checking size and digest.
pub fn read_entry(bundle: &Path, entry: &ManifestEntry) -> ExportResult<Vec<u8>> {
    if entry.size > MAX_ENTRY_SIZE {
        return Err(ExportError::InvalidBundle(format!("{} exceeds size limit", entry.path)));
    }
    let bytes = fs::read(safe_join(bundle, &entry.path)?)?;
    if bytes.len() as u64 != entry.size || blake3_hex(&bytes) != entry.digest {
        return Err(ExportError::InvalidBundle(format!("{} does not match its digest", entry.path)));
    }
    Ok(bytes)
}

/// Check a bundle on disk: format version, manifest checksum and every
/// entry's digest.
pub fn verify_bundle(bundle: &Path) -> ExportResult<Manifest> {
    let raw = fs::read(bundle.join(MANIFEST_FILE))
        .map_err(|e| ExportError::InvalidBundle(format!("manifest unreadable: {e}")))?;
    let manifest: Manifest = serde_json::from_slice(&raw)
        .map_err(|e| ExportError::InvalidBundle(format!("manifest malformed: {e}")))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(ExportError::InvalidBundle(format!(
            "unsupported format version {} (supported {FORMAT_VERSION})",
            manifest.format_version
        )));
    }
    if Manifest::checksum_of(&manifest.entries) != manifest.checksum {
        return Err(ExportError::InvalidBundle("manifest checksum mismatch".into()));
    }
    for entry in &manifest.entries {
        read_entry(bundle, entry)?;
    }
    Ok(manifest)
}
