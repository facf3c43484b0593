//! Fixtures: lease-based clusters over one shared backend, single-node
//! stores, and full kernel graphs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use hk_01_leadership::{
    InMemoryLeaseArbiter, LeaseConfig, LeaseConsensusProvider, Leadership, LeadershipRegistry,
    ManualTimeSource, SingleNodeProvider, SystemTimeSource,
};
use hk_02_control_store::{ControlStore, ControlStoreConfig, InMemoryKVStore};
use hk_03_volume_manager::{InMemoryMountBackend, MockSpaceProbe};
use node_runtime::{GraphParts, KernelGraph, NodeConfig};
use shared_bus::InMemoryEventBus;
use shared_types::{
    ClusterMode, Command, CommandEnvelope, CommandResult, Component, Credential, ResourceKey,
    ShutdownSignal,
};

pub const TTL_MS: u64 = 3_000;
pub const PASSPHRASE: &str = "correct horse battery staple";

pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// LEASE CLUSTER
// =============================================================================

pub struct Member {
    pub id: String,
    pub bus: Arc<InMemoryEventBus>,
    pub leadership: Leadership,
    pub provider: Arc<LeaseConsensusProvider>,
    pub store: ControlStore,
}

impl Member {
    pub fn registry(&self) -> &LeadershipRegistry {
        self.leadership.registry()
    }

    pub fn leads_kernel(&self) -> bool {
        self.registry().is_leader(&ResourceKey::Kernel)
    }
}

/// Members sharing one arbiter, one clock and one key-value backend.
pub struct Cluster {
    pub clock: Arc<ManualTimeSource>,
    pub arbiter: Arc<InMemoryLeaseArbiter>,
    pub kv: InMemoryKVStore,
    pub members: Vec<Member>,
}

impl Cluster {
    /// The first id wins the initial election.
    pub async fn new(ids: &[&str]) -> Self {
        let clock = Arc::new(ManualTimeSource::new(10_000));
        let arbiter = Arc::new(InMemoryLeaseArbiter::new(clock.clone()));
        let kv = InMemoryKVStore::new();

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            let bus = Arc::new(InMemoryEventBus::new());
            let registry = LeadershipRegistry::new(*id, bus.clone(), clock.clone());
            let provider = Arc::new(LeaseConsensusProvider::new(
                *id,
                format!("{id}.lan:9470"),
                arbiter.clone(),
                clock.clone(),
                LeaseConfig {
                    ttl: Duration::from_millis(TTL_MS),
                    // Ticks are driven by hand.
                    renew_interval: Duration::from_secs(3_600),
                },
            ));
            let leadership = Leadership::new(registry.clone(), provider.clone());
            let (_tx, shutdown) = ShutdownSignal::channel();
            leadership.start(shutdown).await.unwrap();
            leadership
                .register(ResourceKey::Kernel, ClusterMode::Stateful)
                .await
                .unwrap();

            let store = ControlStore::open(
                kv.clone(),
                Arc::new(registry),
                bus.clone(),
                ControlStoreConfig::for_testing(),
            )
            .unwrap();
            store.unlock(&Credential::new(PASSPHRASE)).await.unwrap();

            members.push(Member {
                id: (*id).to_string(),
                bus,
                leadership,
                provider,
                store,
            });
        }

        // Let each provider's background loop make its first poll now
        // rather than in the middle of a test step.
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        Self {
            clock,
            arbiter,
            kv,
            members,
        }
    }

    pub async fn tick_all(&self) {
        for member in &self.members {
            member.provider.tick().await;
        }
    }

    pub fn leaders(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.leads_kernel())
            .map(|m| m.id.as_str())
            .collect()
    }
}

// =============================================================================
// SINGLE NODE
// =============================================================================

pub struct Node {
    pub bus: Arc<InMemoryEventBus>,
    pub leadership: Leadership,
    pub store: ControlStore,
    pub kv: InMemoryKVStore,
}

/// Single-node kernel leader with an unlocked store.
pub async fn single_node() -> Node {
    let bus = Arc::new(InMemoryEventBus::new());
    let registry = LeadershipRegistry::new("solo", bus.clone(), Arc::new(SystemTimeSource));
    let leadership = Leadership::new(registry.clone(), Arc::new(SingleNodeProvider::new()));
    let (_tx, shutdown) = ShutdownSignal::channel();
    leadership.start(shutdown).await.unwrap();
    leadership
        .register(ResourceKey::Kernel, ClusterMode::Stateful)
        .await
        .unwrap();

    let kv = InMemoryKVStore::new();
    let store = ControlStore::open(
        kv.clone(),
        Arc::new(registry),
        bus.clone(),
        ControlStoreConfig::for_testing(),
    )
    .unwrap();
    store.unlock(&Credential::new(PASSPHRASE)).await.unwrap();
    Node {
        bus,
        leadership,
        store,
        kv,
    }
}

// =============================================================================
// KERNEL GRAPH
// =============================================================================

pub struct Kernel {
    pub graph: KernelGraph,
    pub kv: InMemoryKVStore,
    _dir: tempfile::TempDir,
}

impl Kernel {
    pub async fn run(&self, command: Command) -> CommandResult {
        self.graph
            .dispatcher
            .dispatch(CommandEnvelope::new(command))
            .await
    }
}

pub fn kernel_config(dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.store.data_dir = dir.to_path_buf();
    config.store.kdf_rounds = 2;
    config.store.health_interval = Duration::from_secs(3_600);
    config.volume.data_root = dir.join("volumes");
    config.export.export_dir = dir.join("exports");
    config.api.bind_addr = "127.0.0.1:0".parse().unwrap();
    config
}

/// Started single-node kernel with its store unlocked.
pub async fn kernel() -> Kernel {
    let dir = tempfile::TempDir::new().unwrap();
    let kv = InMemoryKVStore::new();
    let parts = GraphParts {
        kv: Some(Box::new(kv.clone())),
        mount_backend: Some(Arc::new(InMemoryMountBackend::new())),
        space_probe: Some(Arc::new(MockSpaceProbe::new(80, 100))),
        ..GraphParts::default()
    };
    let graph = KernelGraph::build(kernel_config(dir.path()), parts).unwrap();
    graph.start().await.unwrap();

    let kernel = Kernel {
        graph,
        kv,
        _dir: dir,
    };
    let unlocked = kernel
        .run(Command::Unlock {
            credential: Credential::new(PASSPHRASE),
        })
        .await;
    assert!(unlocked.ok, "unlock failed: {:?}", unlocked.message);
    kernel
}
