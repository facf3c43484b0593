//! # Volume Manager Service
//!
//! ```text
//!  create_volume ──→ catalog (memory, + control store when writable)
//!  attach_volume ──→ allowed_mode(class, cluster mode, role) ──→ MountBackend
//!                         │
//!                         └── request above allowed → VolumeDenied
//!  reconcile(resource) ──→ remount to the role's mode ──→ VolumeRoleChanged
//! ```
//!
//! Mount calls run on the blocking pool, serialized per volume.

use hk_01_leadership::RoleView;
use hk_02_control_store::{ControlStore, SecretsRepository, VolumeCatalogRepository};
use parking_lot::{Mutex, RwLock};
use shared_bus::{EventPublisher, KernelEvent};
use shared_crypto::SecretKey;
use shared_types::{
    validate_name, ClusterMode, MountMode, ResourceKey, VolumeClass, VolumeSpec,
};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{allowed_mode, Attachment, CreateOutcome, VolumeError, VolumeResult, VolumeState};
use crate::ports::MountBackend;

struct ManagerInner {
    backend: Arc<dyn MountBackend>,
    roles: Arc<dyn RoleView>,
    bus: Arc<dyn EventPublisher>,
    store: Option<ControlStore>,
    volumes: RwLock<BTreeMap<String, VolumeState>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Owns the attach/detach lifecycle of every volume. Cheap to clone.
#[derive(Clone)]
pub struct VolumeManager {
    inner: Arc<ManagerInner>,
}

impl VolumeManager {
    /// Without a store the catalog is memory-only and bootstrap volumes
    /// cannot be keyed.
    pub fn new(
        backend: Arc<dyn MountBackend>,
        roles: Arc<dyn RoleView>,
        bus: Arc<dyn EventPublisher>,
        store: Option<ControlStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                backend,
                roles,
                bus,
                store,
                volumes: RwLock::new(BTreeMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<VolumeState> {
        self.inner.volumes.read().get(name).cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<VolumeState> {
        self.inner.volumes.read().values().cloned().collect()
    }

    #[must_use]
    pub fn attached_mode(&self, name: &str) -> Option<MountMode> {
        self.inner.volumes.read().get(name).and_then(|v| v.attached)
    }

    /// On-disk contents of `name`, for exports.
    #[must_use]
    pub fn data_path(&self, name: &str) -> Option<PathBuf> {
        let spec = self.get(name)?.spec;
        self.inner.backend.data_path(&spec)
    }

    /// Mode this member may use for `spec` right now.
    pub fn allowed_for(&self, spec: &VolumeSpec) -> VolumeResult<MountMode> {
        let owner = spec.owner()?;
        let role = self.inner.roles.role(&owner);
        // Unregistered owners read as stateful, which fails closed.
        let cluster_mode = self
            .inner
            .roles
            .cluster_mode(&owner)
            .unwrap_or(ClusterMode::Stateful);
        Ok(allowed_mode(spec.class, cluster_mode, role))
    }

    // =========================================================================
    // CATALOG
    // =========================================================================

    /// Idempotent: an identical spec is a no-op success, a different spec
    /// under the same name is a `Conflict`.
    pub async fn create_volume(&self, spec: VolumeSpec) -> VolumeResult<CreateOutcome> {
        validate_name(&spec.name)?;
        spec.owner()?;

        let lock = self.volume_lock(&spec.name);
        let _guard = lock.lock().await;

        if let Some(existing) = self.get(&spec.name) {
            if existing.spec == spec {
                debug!(volume = %spec.name, "[hk-03] create_volume: already exists");
                return Ok(CreateOutcome::Exists);
            }
            return Err(VolumeError::Conflict { name: spec.name });
        }

        let persisted = match self.writable_catalog() {
            Some(catalog) if spec.class != VolumeClass::Bootstrap => {
                catalog.save(&spec).await?;
                true
            }
            _ => false,
        };

        info!(
            volume = %spec.name,
            class = %spec.class,
            persisted,
            "[hk-03] volume created"
        );
        self.inner
            .volumes
            .write()
            .insert(spec.name.clone(), VolumeState::new(spec, persisted));
        Ok(CreateOutcome::Created)
    }

    /// Merge the persisted catalog into memory. Returns how many volumes
    /// were added.
    pub fn load_catalog(&self) -> VolumeResult<usize> {
        let Some(store) = &self.inner.store else {
            return Ok(0);
        };
        let specs = VolumeCatalogRepository::new(store.clone()).list()?;
        let mut volumes = self.inner.volumes.write();
        let mut added = 0;
        for spec in specs {
            if let Some(existing) = volumes.get_mut(&spec.name) {
                existing.persisted = existing.spec == spec;
                continue;
            }
            volumes.insert(spec.name.clone(), VolumeState::new(spec, true));
            added += 1;
        }
        info!(added, total = volumes.len(), "[hk-03] volume catalog loaded");
        Ok(added)
    }

    fn writable_catalog(&self) -> Option<VolumeCatalogRepository> {
        let store = self.inner.store.as_ref()?;
        (store.is_ready() && self.inner.roles.is_leader(&ResourceKey::Kernel))
            .then(|| VolumeCatalogRepository::new(store.clone()))
    }

    // =========================================================================
    // ATTACH / DETACH
    // =========================================================================

    /// Attach `name` in `requested` mode. Never downgrades: a request the
    /// current role does not allow fails with `Denied`.
    pub async fn attach_volume(&self, name: &str, requested: MountMode) -> VolumeResult<Attachment> {
        if requested == MountMode::Denied {
            return Err(VolumeError::Invalid("cannot attach in mode denied".into()));
        }
        let lock = self.volume_lock(name);
        let _guard = lock.lock().await;

        let state = self
            .get(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        let allowed = self.allowed_for(&state.spec)?;
        if !allowed.permits(requested) {
            warn!(volume = name, %requested, %allowed, "[hk-03] attach denied");
            return Err(VolumeError::Denied {
                name: name.to_string(),
                requested,
                allowed,
            });
        }

        if let (Some(mode), Some(path)) = (state.attached, &state.path) {
            if mode == requested {
                return Ok(Attachment {
                    name: name.to_string(),
                    mode,
                    path: path.clone(),
                });
            }
        }

        let key = match state.spec.class {
            VolumeClass::Bootstrap => Some(self.bootstrap_key(name).await?),
            _ => None,
        };
        let path = self.mount(state.spec.clone(), requested, key).await?;

        if let Some(v) = self.inner.volumes.write().get_mut(name) {
            v.desired = Some(requested);
            v.attached = Some(requested);
            v.path = Some(path.clone());
        }
        info!(volume = name, mode = %requested, "[hk-03] volume attached");
        Ok(Attachment {
            name: name.to_string(),
            mode: requested,
            path,
        })
    }

    /// Idempotent. Returns whether anything was unmounted.
    pub async fn detach_volume(&self, name: &str) -> VolumeResult<bool> {
        let lock = self.volume_lock(name);
        let _guard = lock.lock().await;

        let state = self
            .get(name)
            .ok_or_else(|| VolumeError::NotFound(name.to_string()))?;
        let was_attached = state.attached.is_some();
        if was_attached {
            self.unmount(name).await?;
        }
        if let Some(v) = self.inner.volumes.write().get_mut(name) {
            v.desired = None;
            v.attached = None;
            v.path = None;
        }
        if was_attached {
            info!(volume = name, "[hk-03] volume detached");
        }
        Ok(was_attached)
    }

    // =========================================================================
    // ROLE RECONCILIATION
    // =========================================================================

    /// Bring every attached volume of `resource` in line with the current
    /// role. Re-reads the role instead of trusting event order. Returns the
    /// volumes whose mode changed.
    pub async fn reconcile(&self, resource: &ResourceKey) -> Vec<(String, MountMode)> {
        let candidates: Vec<String> = self
            .inner
            .volumes
            .read()
            .values()
            .filter(|v| v.spec.class != VolumeClass::Bootstrap && v.desired.is_some())
            .filter(|v| v.spec.owner().ok().as_ref() == Some(resource))
            .map(|v| v.spec.name.clone())
            .collect();

        let mut changed = Vec::new();
        for name in candidates {
            match self.reconcile_volume(&name).await {
                Ok(Some(mode)) => {
                    self.inner
                        .bus
                        .publish(KernelEvent::VolumeRoleChanged {
                            resource: resource.clone(),
                            volume: name.clone(),
                            mode,
                        })
                        .await;
                    changed.push((name, mode));
                }
                Ok(None) => {}
                Err(e) => warn!(volume = %name, error = %e, "[hk-03] remount failed"),
            }
        }
        if !changed.is_empty() {
            info!(%resource, changed = changed.len(), "[hk-03] volumes reconciled");
        }
        changed
    }

    async fn reconcile_volume(&self, name: &str) -> VolumeResult<Option<MountMode>> {
        let lock = self.volume_lock(name);
        let _guard = lock.lock().await;

        let Some(state) = self.get(name) else {
            return Ok(None);
        };
        let Some(desired) = state.desired else {
            return Ok(None);
        };
        let allowed = self.allowed_for(&state.spec)?;
        let target = if allowed == MountMode::Denied {
            MountMode::Denied
        } else {
            desired.min(allowed)
        };
        let current = state.attached.unwrap_or(MountMode::Denied);
        if current == target {
            return Ok(None);
        }

        let path = if target == MountMode::Denied {
            self.unmount(name).await?;
            None
        } else {
            Some(self.mount(state.spec.clone(), target, None).await?)
        };
        if let Some(v) = self.inner.volumes.write().get_mut(name) {
            v.attached = (target != MountMode::Denied).then_some(target);
            v.path = path;
        }
        debug!(volume = name, from = %current, to = %target, "[hk-03] volume remounted");
        Ok(Some(target))
    }

    /// Owners of volumes that are meant to be attached.
    #[must_use]
    pub fn attached_owners(&self) -> Vec<ResourceKey> {
        let mut owners: Vec<ResourceKey> = self
            .inner
            .volumes
            .read()
            .values()
            .filter(|v| v.desired.is_some() && v.spec.class != VolumeClass::Bootstrap)
            .filter_map(|v| v.spec.owner().ok())
            .collect();
        owners.sort();
        owners.dedup();
        owners
    }

    // =========================================================================
    // BOOTSTRAP VOLUMES
    // =========================================================================

    /// Re-key and mount every bootstrap volume after an unlock. Volumes are
    /// those with a key in `secrets` plus any created locally.
    pub async fn rebuild_bootstrap(&self, secrets: &SecretsRepository) -> VolumeResult<Vec<Attachment>> {
        for name in secrets.keyed_volumes()? {
            if self.get(&name).is_none() {
                let spec = VolumeSpec::new(name.clone(), VolumeClass::Bootstrap, Default::default());
                self.inner
                    .volumes
                    .write()
                    .insert(name, VolumeState::new(spec, false));
            }
        }

        let names: Vec<String> = self
            .list()
            .into_iter()
            .filter(|v| v.spec.class == VolumeClass::Bootstrap)
            .map(|v| v.spec.name)
            .collect();

        let mut mounted = Vec::with_capacity(names.len());
        for name in names {
            let key = Self::key_from(secrets, &name, self.inner.roles.is_leader(&ResourceKey::Kernel)).await?;
            let lock = self.volume_lock(&name);
            let _guard = lock.lock().await;
            let Some(state) = self.get(&name) else { continue };
            let path = self.mount(state.spec, MountMode::ReadWrite, Some(key)).await?;
            if let Some(v) = self.inner.volumes.write().get_mut(&name) {
                v.desired = Some(MountMode::ReadWrite);
                v.attached = Some(MountMode::ReadWrite);
                v.path = Some(path.clone());
            }
            mounted.push(Attachment {
                name,
                mode: MountMode::ReadWrite,
                path,
            });
        }
        info!(count = mounted.len(), "[hk-03] bootstrap volumes rebuilt");
        Ok(mounted)
    }

    async fn bootstrap_key(&self, name: &str) -> VolumeResult<SecretKey> {
        let store = self
            .inner
            .store
            .as_ref()
            .ok_or_else(|| VolumeError::MissingKey(name.to_string()))?;
        let secrets = SecretsRepository::new(store.clone());
        Self::key_from(&secrets, name, self.inner.roles.is_leader(&ResourceKey::Kernel)).await
    }

    /// Existing key, or a new one when this member may commit.
    async fn key_from(secrets: &SecretsRepository, name: &str, may_issue: bool) -> VolumeResult<SecretKey> {
        match secrets.volume_key(name)? {
            Some(key) => Ok(key),
            None if may_issue => Ok(secrets.ensure_volume_key(name).await?),
            None => Err(VolumeError::MissingKey(name.to_string())),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn volume_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    async fn mount(&self, spec: VolumeSpec, mode: MountMode, key: Option<SecretKey>) -> VolumeResult<PathBuf> {
        let backend = self.inner.backend.clone();
        let name = spec.name.clone();
        tokio::task::spawn_blocking(move || backend.mount(&spec, mode, key.as_ref()))
            .await
            .map_err(|e| VolumeError::Mount {
                name: name.clone(),
                detail: e.to_string(),
            })?
            .map_err(|e| VolumeError::Mount {
                name,
                detail: e.to_string(),
            })
    }

    async fn unmount(&self, name: &str) -> VolumeResult<()> {
        let backend = self.inner.backend.clone();
        let owned = name.to_string();
        tokio::task::spawn_blocking(move || backend.unmount(&owned))
            .await
            .map_err(|e| VolumeError::Mount {
                name: name.to_string(),
                detail: e.to_string(),
            })?
            .map_err(|e| VolumeError::Mount {
                name: name.to_string(),
                detail: e.to_string(),
            })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{blog, harness};
    use super::*;
    use shared_bus::{EventFilter, EventTopic};
    use shared_types::VolumeOptions;

    fn blog_data() -> VolumeSpec {
        VolumeSpec::new("blog-data", VolumeClass::Application, VolumeOptions::for_app("blog"))
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let h = harness().await;
        assert_eq!(h.manager.create_volume(blog_data()).await.unwrap(), CreateOutcome::Created);
        assert_eq!(h.manager.create_volume(blog_data()).await.unwrap(), CreateOutcome::Exists);
        assert_eq!(h.manager.list().len(), 1);
        assert!(h.manager.get("blog-data").unwrap().persisted);
    }

    #[tokio::test]
    async fn test_create_conflict_on_different_options() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();

        let mut other = blog_data();
        other.options.size_mb = 512;
        assert_eq!(
            h.manager.create_volume(other).await,
            Err(VolumeError::Conflict { name: "blog-data".into() })
        );
    }

    #[tokio::test]
    async fn test_catalog_held_in_memory_while_locked() {
        let h = harness().await;
        h.store.lock().await.unwrap();
        h.manager.create_volume(blog_data()).await.unwrap();
        assert!(!h.manager.get("blog-data").unwrap().persisted);
    }

    #[tokio::test]
    async fn test_load_catalog_restores_persisted_volumes() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();

        let fresh = VolumeManager::new(
            h.backend.clone(),
            Arc::new(h.registry.clone()),
            h.bus.clone(),
            Some(h.store.clone()),
        );
        assert_eq!(fresh.load_catalog().unwrap(), 1);
        assert_eq!(fresh.get("blog-data").unwrap().spec, blog_data());
    }

    #[tokio::test]
    async fn test_leader_attaches_read_write() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();
        let att = h.manager.attach_volume("blog-data", MountMode::ReadWrite).await.unwrap();
        assert_eq!(att.mode, MountMode::ReadWrite);
        assert_eq!(h.backend.mounted(), vec![("blog-data".to_string(), MountMode::ReadWrite)]);
    }

    #[tokio::test]
    async fn test_cold_follower_is_denied_not_downgraded() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();
        h.demote(&blog()).await;

        let err = h
            .manager
            .attach_volume("blog-data", MountMode::ReadOnly)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VolumeError::Denied {
                name: "blog-data".into(),
                requested: MountMode::ReadOnly,
                allowed: MountMode::Denied,
            }
        );
        assert!(h.backend.mounted().is_empty());
    }

    #[tokio::test]
    async fn test_stateless_app_mounts_read_only() {
        let h = harness().await;
        let spec = VolumeSpec::new("docs-data", VolumeClass::Application, VolumeOptions::for_app("docs"));
        h.manager.create_volume(spec).await.unwrap();

        assert!(matches!(
            h.manager.attach_volume("docs-data", MountMode::ReadWrite).await,
            Err(VolumeError::Denied { allowed: MountMode::ReadOnly, .. })
        ));
        let att = h.manager.attach_volume("docs-data", MountMode::ReadOnly).await.unwrap();
        assert_eq!(att.mode, MountMode::ReadOnly);
    }

    #[tokio::test]
    async fn test_detach_is_idempotent() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();
        h.manager.attach_volume("blog-data", MountMode::ReadWrite).await.unwrap();

        assert!(h.manager.detach_volume("blog-data").await.unwrap());
        assert!(!h.manager.detach_volume("blog-data").await.unwrap());
        assert!(h.backend.mounted().is_empty());
        assert!(matches!(
            h.manager.detach_volume("nope").await,
            Err(VolumeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_follows_role() {
        let h = harness().await;
        h.manager.create_volume(blog_data()).await.unwrap();
        h.manager.attach_volume("blog-data", MountMode::ReadWrite).await.unwrap();
        let mut sub = h.bus.subscribe(EventFilter::topic(EventTopic::VolumeRoleChanged));

        h.demote(&blog()).await;
        let changed = h.manager.reconcile(&blog()).await;
        assert_eq!(changed, vec![("blog-data".to_string(), MountMode::Denied)]);
        assert!(h.backend.mounted().is_empty());

        h.promote(&blog()).await;
        let changed = h.manager.reconcile(&blog()).await;
        assert_eq!(changed, vec![("blog-data".to_string(), MountMode::ReadWrite)]);

        // Nothing to do when the mode already matches.
        assert!(h.manager.reconcile(&blog()).await.is_empty());

        let modes: Vec<_> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e.payload {
                KernelEvent::VolumeRoleChanged { mode, .. } => Some(mode),
                _ => None,
            })
            .collect();
        assert_eq!(modes, vec![MountMode::Denied, MountMode::ReadWrite]);
    }

    #[tokio::test]
    async fn test_control_volume_goes_read_only_on_demotion() {
        let h = harness().await;
        let spec = VolumeSpec::new("control", VolumeClass::Control, VolumeOptions::default());
        h.manager.create_volume(spec).await.unwrap();
        h.manager.attach_volume("control", MountMode::ReadWrite).await.unwrap();

        h.demote(&ResourceKey::Kernel).await;
        let changed = h.manager.reconcile(&ResourceKey::Kernel).await;
        assert_eq!(changed, vec![("control".to_string(), MountMode::ReadOnly)]);
        assert_eq!(h.manager.attached_mode("control"), Some(MountMode::ReadOnly));
    }

    #[tokio::test]
    async fn test_rebuild_bootstrap_issues_and_reuses_keys() {
        let h = harness().await;
        let spec = VolumeSpec::new("boot", VolumeClass::Bootstrap, VolumeOptions::default());
        h.manager.create_volume(spec).await.unwrap();
        assert!(!h.manager.get("boot").unwrap().persisted);

        let secrets = SecretsRepository::new(h.store.clone());
        let mounted = h.manager.rebuild_bootstrap(&secrets).await.unwrap();
        assert_eq!(mounted.len(), 1);
        let key = secrets.volume_key("boot").unwrap().unwrap();

        // A fresh manager learns the volume from its key and reuses it.
        let fresh = VolumeManager::new(
            h.backend.clone(),
            Arc::new(h.registry.clone()),
            h.bus.clone(),
            Some(h.store.clone()),
        );
        let mounted = fresh.rebuild_bootstrap(&secrets).await.unwrap();
        assert_eq!(mounted[0].name, "boot");
        assert_eq!(secrets.volume_key("boot").unwrap().unwrap(), key);
    }

    #[tokio::test]
    async fn test_bootstrap_key_not_issued_by_follower() {
        let h = harness().await;
        h.demote(&ResourceKey::Kernel).await;
        let spec = VolumeSpec::new("boot", VolumeClass::Bootstrap, VolumeOptions::default());
        h.manager.create_volume(spec).await.unwrap();

        assert_eq!(
            h.manager.attach_volume("boot", MountMode::ReadWrite).await,
            Err(VolumeError::MissingKey("boot".into()))
        );
    }
}
