//! # Export Manager Service
//!
//! ```text
//!  run_export(kind)
//!     │  store degraded? ──yes──→ StoreUnhealthy, ExportResult{ok: false}
//!     ▼
//!  snapshot + device registry (+ application volumes for full_data)
//!     │  blocking pool
//!     ▼
//!  bundle dir, manifest written last ──→ ExportResult{ok: true, manifest}
//!
//!  import(bundle) ──→ verify ──→ restore_snapshot (store locked, read-only)
//!                           └──→ unpack volumes (full_data)
//! ```

use chrono::Utc;
use hk_02_control_store::{ControlStore, DeviceRecord, DeviceRegistryRepository, StoreSnapshot};
use hk_03_volume_manager::{CreateOutcome, VolumeManager};
use shared_bus::{EventPublisher, KernelEvent};
use shared_types::{ExportKind, StoreHealth, VolumeClass, VolumeSpec};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::archive::{pack_volume, read_entry, unpack_volume, verify_bundle, write_entry};
use crate::domain::{
    ExportConfig, ExportError, ExportOutcome, ExportResult, Manifest, VolumeArchive, DEVICES_FILE,
    MANIFEST_FILE, SNAPSHOT_FILE, VOLUMES_DIR,
};

pub struct ExportManager {
    store: ControlStore,
    volumes: VolumeManager,
    bus: Arc<dyn EventPublisher>,
    config: ExportConfig,
}

impl ExportManager {
    pub fn new(
        store: ControlStore,
        volumes: VolumeManager,
        bus: Arc<dyn EventPublisher>,
        config: ExportConfig,
    ) -> Self {
        Self {
            store,
            volumes,
            bus,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Build a bundle under the export directory and publish the result.
    pub async fn run_export(&self, kind: ExportKind) -> ExportResult<ExportOutcome> {
        let result = self.build(kind).await;
        let event = match &result {
            Ok(outcome) => {
                info!(
                    %kind,
                    path = %outcome.path.display(),
                    revision = outcome.manifest.store_revision,
                    entries = outcome.manifest.entries.len(),
                    "[hk-04] export finished"
                );
                KernelEvent::ExportResult {
                    kind,
                    ok: true,
                    manifest: serde_json::to_value(&outcome.manifest).ok(),
                    error: None,
                }
            }
            Err(e) => {
                warn!(%kind, error = %e, "[hk-04] export failed");
                KernelEvent::ExportResult {
                    kind,
                    ok: false,
                    manifest: None,
                    error: Some(e.to_string()),
                }
            }
        };
        self.bus.publish(event).await;
        result
    }

    async fn build(&self, kind: ExportKind) -> ExportResult<ExportOutcome> {
        if self.store.health() == StoreHealth::Degraded {
            return Err(ExportError::StoreUnhealthy(
                self.store
                    .health_detail()
                    .unwrap_or_else(|| "integrity check failed".into()),
            ));
        }
        let devices = DeviceRegistryRepository::new(self.store.clone()).list()?;
        let snapshot = self.store.snapshot().await?;

        let volumes: Vec<(VolumeSpec, Option<PathBuf>)> = match kind {
            ExportKind::ControlOnly => Vec::new(),
            ExportKind::FullData => self
                .volumes
                .list()
                .into_iter()
                .filter(|v| v.spec.class == VolumeClass::Application)
                .map(|v| {
                    let path = self.volumes.data_path(&v.spec.name);
                    (v.spec, path)
                })
                .collect(),
        };

        let created_at = Utc::now();
        let bundle = self.config.export_dir.join(format!(
            "{kind}-{}-{}",
            created_at.format("%Y%m%dT%H%M%SZ"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));

        tokio::task::spawn_blocking(move || write_bundle(&bundle, kind, created_at, snapshot, devices, volumes))
            .await
            .map_err(|e| ExportError::Io(e.to_string()))?
    }

    /// Verify a bundle on disk without importing it.
    pub async fn verify_bundle(&self, bundle: &Path) -> ExportResult<Manifest> {
        let bundle = bundle.to_path_buf();
        tokio::task::spawn_blocking(move || verify_bundle(&bundle))
            .await
            .map_err(|e| ExportError::Io(e.to_string()))?
    }

    /// Restore a verified bundle. The store ends locked and read-only; the
    /// next unlock completes the import.
    pub async fn import(&self, bundle: &Path) -> ExportResult<Manifest> {
        let path = bundle.to_path_buf();
        let (manifest, snapshot, archives) = tokio::task::spawn_blocking(move || read_bundle(&path))
            .await
            .map_err(|e| ExportError::Io(e.to_string()))??;

        self.store.restore_snapshot(snapshot).await?;

        for archive in archives {
            let name = archive.spec.name.clone();
            if self.volumes.create_volume(archive.spec.clone()).await? == CreateOutcome::Exists {
                info!(volume = %name, "[hk-04] importing into existing volume");
            }
            let Some(dest) = self.volumes.data_path(&name) else {
                warn!(volume = %name, "[hk-04] mount backend has no data path, contents skipped");
                continue;
            };
            let files = tokio::task::spawn_blocking(move || unpack_volume(&archive, &dest))
                .await
                .map_err(|e| ExportError::Io(e.to_string()))??;
            info!(volume = %name, files, "[hk-04] volume contents restored");
        }

        info!(
            kind = %manifest.kind,
            revision = manifest.store_revision,
            "[hk-04] bundle imported, store awaiting unlock"
        );
        Ok(manifest)
    }
}

fn write_bundle(
    bundle: &Path,
    kind: ExportKind,
    created_at: chrono::DateTime<Utc>,
    snapshot: StoreSnapshot,
    devices: Vec<DeviceRecord>,
    volumes: Vec<(VolumeSpec, Option<PathBuf>)>,
) -> ExportResult<ExportOutcome> {
    std::fs::create_dir_all(bundle)?;

    let revision = snapshot.revision;
    let checksum = snapshot.checksum.clone();
    let mut entries = vec![
        write_entry(bundle, SNAPSHOT_FILE, &bincode::serialize(&snapshot)?)?,
        write_entry(bundle, DEVICES_FILE, &serde_json::to_vec_pretty(&devices)?)?,
    ];
    for (spec, path) in volumes {
        let archive = match path {
            Some(path) => pack_volume(&spec, &path)?,
            None => pack_volume(&spec, Path::new(""))?,
        };
        let relative = format!("{VOLUMES_DIR}/{}.vol", spec.name);
        entries.push(write_entry(bundle, &relative, &bincode::serialize(&archive)?)?);
    }

    let manifest = Manifest::new(kind, created_at, revision, checksum, entries);
    std::fs::write(bundle.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;
    Ok(ExportOutcome {
        path: bundle.to_path_buf(),
        manifest,
    })
}

fn read_bundle(bundle: &Path) -> ExportResult<(Manifest, StoreSnapshot, Vec<VolumeArchive>)> {
    let manifest = verify_bundle(bundle)?;
    let snapshot_entry = manifest
        .entry(SNAPSHOT_FILE)
        .ok_or_else(|| ExportError::InvalidBundle("bundle has no store snapshot".into()))?;
    let snapshot: StoreSnapshot = bincode::deserialize(&read_entry(bundle, snapshot_entry)?)?;
    if snapshot.revision != manifest.store_revision {
        return Err(ExportError::InvalidBundle(format!(
            "snapshot revision {} does not match manifest revision {}",
            snapshot.revision, manifest.store_revision
        )));
    }

    let archives = manifest
        .volume_entries()
        .map(|entry| Ok(bincode::deserialize(&read_entry(bundle, entry)?)?))
        .collect::<ExportResult<Vec<VolumeArchive>>>()?;
    Ok((manifest, snapshot, archives))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hk_01_leadership::{Leadership, LeadershipRegistry, SingleNodeProvider, SystemTimeSource};
    use hk_02_control_store::{ControlStoreConfig, InMemoryKVStore};
    use hk_03_volume_manager::DirectoryMountBackend;
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus};
    use shared_types::{
        ClusterMode, Component, Credential, MountMode, ResourceKey, ShutdownSignal, VolumeOptions,
    };

    struct Node {
        exports: ExportManager,
        store: ControlStore,
        kv: InMemoryKVStore,
        volumes: VolumeManager,
        bus: Arc<InMemoryEventBus>,
        _leadership: Leadership,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    async fn node() -> Node {
        let bus = Arc::new(InMemoryEventBus::new());
        let registry = LeadershipRegistry::new("node-1", bus.clone(), Arc::new(SystemTimeSource));
        let leadership = Leadership::new(registry.clone(), Arc::new(SingleNodeProvider::new()));
        let (_tx, shutdown) = ShutdownSignal::channel();
        leadership.start(shutdown).await.unwrap();
        leadership.register(ResourceKey::Kernel, ClusterMode::Stateful).await.unwrap();
        leadership
            .register(ResourceKey::app("blog").unwrap(), ClusterMode::Stateful)
            .await
            .unwrap();

        let kv = InMemoryKVStore::new();
        let store = ControlStore::open(
            kv.clone(),
            Arc::new(registry.clone()),
            bus.clone(),
            ControlStoreConfig::for_testing(),
        )
        .unwrap();
        store.unlock(&Credential::new("passphrase")).await.unwrap();

        let volume_dir = tempfile::tempdir().unwrap();
        let export_dir = tempfile::tempdir().unwrap();
        let volumes = VolumeManager::new(
            Arc::new(DirectoryMountBackend::new(volume_dir.path())),
            Arc::new(registry),
            bus.clone(),
            Some(store.clone()),
        );
        let exports = ExportManager::new(
            store.clone(),
            volumes.clone(),
            bus.clone(),
            ExportConfig {
                export_dir: export_dir.path().to_path_buf(),
            },
        );
        Node {
            exports,
            store,
            kv,
            volumes,
            bus,
            _leadership: leadership,
            _dirs: (volume_dir, export_dir),
        }
    }

    async fn seed(node: &Node) {
        DeviceRegistryRepository::new(node.store.clone())
            .register(&DeviceRecord {
                device_id: "node-1".into(),
                name: "den".into(),
                public_key: "00".repeat(32),
                addr: "10.0.0.1:7000".into(),
                registered_at: 0,
            })
            .await
            .unwrap();
        let spec = VolumeSpec::new("blog-data", VolumeClass::Application, VolumeOptions::for_app("blog"));
        node.volumes.create_volume(spec).await.unwrap();
        let att = node
            .volumes
            .attach_volume("blog-data", MountMode::ReadWrite)
            .await
            .unwrap();
        std::fs::write(att.path.join("post.md"), b"hello").unwrap();
    }

    #[tokio::test]
    async fn test_control_only_export_verifies() {
        let n = node().await;
        seed(&n).await;
        let mut sub = n.bus.subscribe(EventFilter::topic(EventTopic::ExportResult));

        let outcome = n.exports.run_export(ExportKind::ControlOnly).await.unwrap();
        assert_eq!(outcome.manifest.store_revision, n.store.revision());
        assert!(outcome.manifest.entry(SNAPSHOT_FILE).is_some());
        assert!(outcome.manifest.entry(DEVICES_FILE).is_some());
        assert_eq!(outcome.manifest.volume_entries().count(), 0);

        let verified = n.exports.verify_bundle(&outcome.path).await.unwrap();
        assert_eq!(verified, outcome.manifest);

        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            KernelEvent::ExportResult { kind: ExportKind::ControlOnly, ok: true, manifest: Some(_), .. }
        ));
    }

    #[tokio::test]
    async fn test_degraded_store_refuses_export() {
        let n = node().await;
        seed(&n).await;
        n.kv.tamper(b"rec/devices/node-1", |v| v[0] ^= 0xff);
        n.store.verify_integrity().await.unwrap();
        let mut sub = n.bus.subscribe(EventFilter::topic(EventTopic::ExportResult));

        let err = n.exports.run_export(ExportKind::FullData).await.unwrap_err();
        assert!(matches!(err, ExportError::StoreUnhealthy(_)));

        let event = sub.recv().await.unwrap();
        assert!(matches!(
            event.payload,
            KernelEvent::ExportResult { ok: false, manifest: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_tampered_bundle_fails_verification() {
        let n = node().await;
        seed(&n).await;
        let outcome = n.exports.run_export(ExportKind::ControlOnly).await.unwrap();
        std::fs::write(outcome.path.join(DEVICES_FILE), b"[]").unwrap();

        assert!(matches!(
            n.exports.verify_bundle(&outcome.path).await,
            Err(ExportError::InvalidBundle(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let n = node().await;
        let outcome = n.exports.run_export(ExportKind::ControlOnly).await.unwrap();
        let mut manifest = outcome.manifest.clone();
        manifest.format_version = 99;
        std::fs::write(
            outcome.path.join(MANIFEST_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();

        let err = n.exports.verify_bundle(&outcome.path).await.unwrap_err();
        assert!(err.to_string().contains("unsupported format version 99"));
    }

    #[tokio::test]
    async fn test_full_data_import_on_fresh_node() {
        let source = node().await;
        seed(&source).await;
        let outcome = source.exports.run_export(ExportKind::FullData).await.unwrap();
        assert_eq!(outcome.manifest.volume_entries().count(), 1);

        let target = node().await;
        let manifest = target.exports.import(&outcome.path).await.unwrap();
        assert_eq!(manifest.kind, ExportKind::FullData);
        assert!(target.store.is_locked());
        assert!(target.store.is_read_only());

        let restored = target.volumes.data_path("blog-data").unwrap();
        assert_eq!(std::fs::read(restored.join("post.md")).unwrap(), b"hello");

        target.store.unlock(&Credential::new("passphrase")).await.unwrap();
        assert!(!target.store.is_read_only());
        assert_eq!(target.store.revision(), source.store.revision());
        let devices = DeviceRegistryRepository::new(target.store.clone()).list().unwrap();
        assert_eq!(devices.len(), 1);
    }
}
