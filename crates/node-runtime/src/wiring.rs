//! # Kernel Graph
//!
//! Builds every kernel component from a [`NodeConfig`] and hands the
//! long-lived ones to the [`Supervisor`].
//!
//! ## Build Order
//!
//! ```text
//! Phase 1: event bus
//! Phase 2: leadership registry + consensus provider        (hk-01)
//! Phase 3: key-value backend + control store + health      (hk-02)
//! Phase 4: volume manager + reconciler + disk monitor      (hk-03)
//! Phase 5: export manager                                  (hk-04)
//! Phase 6: route table + router + relay adapter            (hk-05)
//! Phase 7: dispatcher, metrics observer, readiness server
//! Phase 8: supervisor registration
//! ```
//!
//! Every adapter can be swapped through [`GraphParts`]; anything left
//! `None` gets the production default.

use std::path::Path;
use std::sync::Arc;

use hk_01_leadership::{
    ConsensusProvider, LeaseArbiter, LeaseConsensusProvider, Leadership, LeadershipError,
    LeadershipRegistry, SingleNodeProvider, SystemTimeSource, TimeSource,
};
use hk_02_control_store::{
    ControlStore, InMemoryKVStore, KVStoreError, KeyValueStore, StoreError, StoreHealthMonitor,
};
use hk_03_volume_manager::{
    DirectoryMountBackend, DiskMonitor, Fs2SpaceProbe, MountBackend, SpaceProbe, VolumeManager,
    VolumeReconciler,
};
use hk_04_export_manager::ExportManager;
use hk_05_router::{Dialer, RelayAdapter, RouteTable, Router, SignedTokenProvider, TcpDialer};
use shared_bus::{EventPublisher, InMemoryEventBus};
use shared_crypto::Ed25519KeyPair;
use shared_types::{ClusterMode, Component, ResourceKey};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::{ConfigError, NodeConfig, ProviderKind, StoreBackend};
use crate::dispatcher::CommandDispatcher;
use crate::observer::MetricsObserver;
use crate::server::ReadinessServer;
use crate::supervisor::{Supervisor, SupervisorError};

/// Errors raised while assembling or starting the graph.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("control store: {0}")]
    Store(#[from] StoreError),

    #[error("key-value backend: {0}")]
    Kv(#[from] KVStoreError),

    #[error("device key {path}: {reason}")]
    DeviceKey { path: String, reason: String },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("leadership: {0}")]
    Leadership(#[from] LeadershipError),
}

/// Injectable adapters. `None` selects the production default.
#[derive(Default)]
pub struct GraphParts {
    pub kv: Option<Box<dyn KeyValueStore>>,
    pub mount_backend: Option<Arc<dyn MountBackend>>,
    pub space_probe: Option<Arc<dyn SpaceProbe>>,
    pub time: Option<Arc<dyn TimeSource>>,
    /// Required for the lease provider; there is no networked default.
    pub arbiter: Option<Arc<dyn LeaseArbiter>>,
    pub dialer: Option<Arc<dyn Dialer>>,
    pub device_key: Option<Ed25519KeyPair>,
}

/// The assembled kernel.
pub struct KernelGraph {
    pub config: NodeConfig,
    pub bus: Arc<InMemoryEventBus>,
    pub leadership: Arc<Leadership>,
    pub store: ControlStore,
    pub store_health: Arc<StoreHealthMonitor>,
    pub volumes: VolumeManager,
    pub reconciler: Arc<VolumeReconciler>,
    pub disk: Arc<DiskMonitor>,
    pub exports: Arc<ExportManager>,
    pub routes: Arc<RouteTable>,
    pub router: Router,
    pub relay: RelayAdapter,
    pub dispatcher: Arc<CommandDispatcher>,
    pub observer: Arc<MetricsObserver>,
    pub readiness: Arc<ReadinessServer>,
    pub supervisor: Arc<Supervisor>,
}

impl KernelGraph {
    /// Build the graph. Nothing runs until [`KernelGraph::start`].
    #[instrument(name = "kernel_build", skip_all)]
    pub fn build(config: NodeConfig, parts: GraphParts) -> Result<Self, WiringError> {
        config.validate()?;
        info!(member = %config.cluster.member_id, "[wiring] building kernel graph");

        // =====================================================================
        // PHASE 1: Event bus
        // =====================================================================
        let bus = Arc::new(InMemoryEventBus::new());
        let publisher: Arc<dyn EventPublisher> = bus.clone();
        let time = parts.time.unwrap_or_else(|| Arc::new(SystemTimeSource));

        // =====================================================================
        // PHASE 2: Leadership (hk-01)
        // =====================================================================
        let registry = LeadershipRegistry::new(
            config.cluster.member_id.clone(),
            publisher.clone(),
            time.clone(),
        );
        let provider: Arc<dyn ConsensusProvider> = match config.cluster.provider {
            ProviderKind::SingleNode => Arc::new(SingleNodeProvider::new()),
            ProviderKind::Lease => {
                let arbiter = parts.arbiter.ok_or_else(|| {
                    ConfigError::Inconsistent(
                        "lease consensus needs a lease arbiter; none was supplied".into(),
                    )
                })?;
                Arc::new(LeaseConsensusProvider::new(
                    config.cluster.member_id.clone(),
                    config.cluster.advertise_addr.clone(),
                    arbiter,
                    time.clone(),
                    config.cluster.lease_config(),
                ))
            }
        };
        let leadership = Arc::new(Leadership::new(registry.clone(), provider));
        let roles = Arc::new(registry);
        info!(provider = leadership.provider_name(), "  [hk-01] leadership initialized");

        // =====================================================================
        // PHASE 3: Control store (hk-02)
        // =====================================================================
        let kv = match parts.kv {
            Some(kv) => kv,
            None => open_backend(&config)?,
        };
        let store = ControlStore::open(
            kv,
            roles.clone(),
            publisher.clone(),
            config.store.control_store_config(),
        )?;
        let store_health = Arc::new(StoreHealthMonitor::new(store.clone()));
        info!(backend = ?config.store.backend, "  [hk-02] control store initialized");

        // =====================================================================
        // PHASE 4: Volumes (hk-03)
        // =====================================================================
        let mount_backend = parts.mount_backend.unwrap_or_else(|| {
            Arc::new(DirectoryMountBackend::new(config.volume.data_root.clone()))
        });
        let volumes = VolumeManager::new(
            mount_backend,
            roles.clone(),
            publisher.clone(),
            Some(store.clone()),
        );
        let reconciler = Arc::new(VolumeReconciler::new(volumes.clone(), bus.clone()));
        let probe = parts.space_probe.unwrap_or_else(|| Arc::new(Fs2SpaceProbe));
        let disk = Arc::new(DiskMonitor::new(config.volume.clone(), probe, publisher.clone()));
        info!(root = %config.volume.data_root.display(), "  [hk-03] volume manager initialized");

        // =====================================================================
        // PHASE 5: Exports (hk-04)
        // =====================================================================
        let exports = Arc::new(ExportManager::new(
            store.clone(),
            volumes.clone(),
            publisher.clone(),
            config.export.clone(),
        ));
        info!(dir = %config.export.export_dir.display(), "  [hk-04] export manager initialized");

        // =====================================================================
        // PHASE 6: Routing (hk-05)
        // =====================================================================
        let routes = Arc::new(RouteTable::new());
        let dialer = parts
            .dialer
            .unwrap_or_else(|| Arc::new(TcpDialer::new(config.router.dial_timeout)));
        let router = Router::new(routes.clone(), roles.clone(), dialer.clone(), config.router.clone());
        let device_key = match parts.device_key {
            Some(key) => key,
            None => device_key(&config)?,
        };
        let tokens = Arc::new(SignedTokenProvider::new(
            config.relay.device_id.clone(),
            device_key,
            config.relay.token_ttl,
            time,
        ));
        let relay = RelayAdapter::new(
            config.relay.clone(),
            router.clone(),
            routes.clone(),
            tokens,
            dialer,
        );
        info!(
            relay = config.relay.relay_addr.as_deref().unwrap_or("disabled"),
            "  [hk-05] router initialized"
        );

        // =====================================================================
        // PHASE 7: Dispatcher and observability
        // =====================================================================
        let dispatcher = Arc::new(CommandDispatcher::new(
            leadership.clone(),
            store.clone(),
            volumes.clone(),
            exports.clone(),
            routes.clone(),
        ));
        let observer = Arc::new(MetricsObserver::new(bus.clone(), relay.clone(), router.clone()));
        let readiness = Arc::new(ReadinessServer::new(
            config.api.clone(),
            store.clone(),
            dispatcher.clone(),
        ));

        // =====================================================================
        // PHASE 8: Supervision
        // =====================================================================
        let supervisor = Arc::new(Supervisor::new());
        let components: [Arc<dyn Component>; 7] = [
            leadership.clone(),
            store_health.clone(),
            reconciler.clone(),
            disk.clone(),
            Arc::new(relay.clone()),
            observer.clone(),
            readiness.clone(),
        ];
        for component in components {
            supervisor.register(component)?;
        }

        info!("[wiring] kernel graph ready");
        Ok(Self {
            config,
            bus,
            leadership,
            store,
            store_health,
            volumes,
            reconciler,
            disk,
            exports,
            routes,
            router,
            relay,
            dispatcher,
            observer,
            readiness,
            supervisor,
        })
    }

    /// Register the kernel resource and start every component in
    /// dependency order. The store stays locked until an `Unlock` command.
    pub async fn start(&self) -> Result<(), WiringError> {
        self.leadership
            .register(ResourceKey::Kernel, ClusterMode::Stateful)
            .await?;
        self.supervisor.start_all().await?;
        Ok(())
    }

    /// Refuse new commands, stop components in reverse order and seal the
    /// store.
    pub async fn shutdown(&self) -> Result<(), WiringError> {
        self.dispatcher.begin_shutdown();
        let stopped = self.supervisor.stop_all().await;
        if let Err(e) = self.store.lock().await {
            warn!(error = %e, "[wiring] failed to lock control store during shutdown");
        }
        stopped?;
        info!("[wiring] kernel stopped");
        Ok(())
    }
}

fn open_backend(config: &NodeConfig) -> Result<Box<dyn KeyValueStore>, WiringError> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("[hk-02] in-memory control store: state is lost on exit");
            Ok(Box::new(InMemoryKVStore::new()))
        }
        #[cfg(feature = "rocksdb")]
        StoreBackend::RocksDb => {
            let path = config.store.db_path();
            let db = hk_02_control_store::RocksDbStore::open_default(&path)?;
            info!(path = %path.display(), "[hk-02] rocksdb backend opened");
            Ok(Box::new(db))
        }
        #[cfg(not(feature = "rocksdb"))]
        StoreBackend::RocksDb => Err(ConfigError::BackendUnavailable("rocksdb").into()),
    }
}

/// Relay identity. Without a relay the key never leaves this process, so
/// it is not persisted.
fn device_key(config: &NodeConfig) -> Result<Ed25519KeyPair, WiringError> {
    if config.relay.relay_addr.is_none() {
        return Ok(Ed25519KeyPair::generate());
    }
    load_or_create_key(&config.store.device_key_path())
}

/// Device key file: hex-encoded 32-byte ed25519 seed.
pub fn load_or_create_key(path: &Path) -> Result<Ed25519KeyPair, WiringError> {
    let key_error = |reason: String| WiringError::DeviceKey {
        path: path.display().to_string(),
        reason,
    };

    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let bytes = hex::decode(raw.trim()).map_err(|e| key_error(e.to_string()))?;
            let seed: [u8; 32] = bytes
                .try_into()
                .map_err(|b: Vec<u8>| key_error(format!("expected 32 bytes, found {}", b.len())))?;
            info!(path = %path.display(), "[wiring] device key loaded");
            Ok(Ed25519KeyPair::from_seed(seed))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = Ed25519KeyPair::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| key_error(e.to_string()))?;
            }
            std::fs::write(path, hex::encode(key.to_seed())).map_err(|e| key_error(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    .map_err(|e| key_error(e.to_string()))?;
            }
            info!(path = %path.display(), "[wiring] device key created");
            Ok(key)
        }
        Err(e) => Err(key_error(e.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use shared_types::ComponentId;

    #[tokio::test]
    async fn test_graph_starts_every_component() {
        let t = graph().await;
        assert!(t.graph.leadership.registry().is_leader(&ResourceKey::Kernel));
        assert!(t.graph.store.is_locked());
        for id in [
            ComponentId::Consensus,
            ComponentId::StoreHealth,
            ComponentId::VolumeReconciler,
            ComponentId::DiskMonitor,
            ComponentId::RelayAdapter,
            ComponentId::MetricsObserver,
            ComponentId::Readiness,
        ] {
            assert!(
                t.graph.supervisor.status(id).is_some_and(|s| s.is_running()),
                "{id} not running"
            );
        }
    }

    #[tokio::test]
    async fn test_shutdown_locks_store() {
        let t = unlocked_graph().await;
        assert!(!t.graph.store.is_locked());
        t.graph.shutdown().await.unwrap();
        assert!(t.graph.store.is_locked());
        assert!(t.graph.dispatcher.is_shutting_down());
    }

    #[test]
    fn test_lease_provider_requires_arbiter() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = test_config(dir.path());
        config.cluster.provider = ProviderKind::Lease;
        let err = KernelGraph::build(config, GraphParts::default()).err().unwrap();
        assert!(matches!(err, WiringError::Config(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn test_device_key_persists() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keys").join("device.key");
        let first = load_or_create_key(&path).unwrap();
        let second = load_or_create_key(&path).unwrap();
        assert_eq!(first.public_key(), second.public_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_corrupt_device_key_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("device.key");
        std::fs::write(&path, "abcd").unwrap();
        assert!(matches!(
            load_or_create_key(&path),
            Err(WiringError::DeviceKey { .. })
        ));
    }
}
