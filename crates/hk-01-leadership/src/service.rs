//! Leadership registry and service.
//!
//! ```text
//!  ConsensusProvider ──RoleWriter::write──→ LeadershipRegistry ──→ [Event Bus]
//!        ↑                                        │             LeadershipRoleChanged
//!        │ track / failover                       │ get_role / is_leader
//!  Leadership (Component) ◄───────────────────────┘
//! ```
//!
//! The registry holds no consensus logic. Its only write path is the
//! [`RoleWriter`], which serializes transitions so a resource never has two
//! role events published out of order.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_bus::{EventPublisher, KernelEvent};
use shared_types::{
    ClusterMode, Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo,
    ComponentStatus, ResourceKey, Role, ShutdownSignal,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{LeadershipError, LeadershipResult, MemberId, RoleEntry, RoleUpdate};
use crate::ports::{ConsensusProvider, RoleView, TimeSource};

struct RegistryInner {
    member_id: MemberId,
    entries: RwLock<HashMap<ResourceKey, RoleEntry>>,
    bus: Arc<dyn EventPublisher>,
    time: Arc<dyn TimeSource>,
    /// Held across update + publish so events leave in transition order.
    write_order: tokio::sync::Mutex<()>,
    transitions: AtomicU64,
}

/// Per-resource role ledger of this member.
#[derive(Clone)]
pub struct LeadershipRegistry {
    inner: Arc<RegistryInner>,
}

impl LeadershipRegistry {
    pub fn new(
        member_id: impl Into<MemberId>,
        bus: Arc<dyn EventPublisher>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                member_id: member_id.into(),
                entries: RwLock::new(HashMap::new()),
                bus,
                time,
                write_order: tokio::sync::Mutex::new(()),
                transitions: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn member_id(&self) -> &str {
        &self.inner.member_id
    }

    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.inner.time.now_ms()
    }

    /// Role of this member for `resource`.
    ///
    /// Unregistered resources and expired leases read as `FollowerCold`.
    #[must_use]
    pub fn get_role(&self, resource: &ResourceKey) -> Role {
        let now = self.now_ms();
        self.inner
            .entries
            .read()
            .get(resource)
            .map_or(Role::FollowerCold, |entry| entry.effective_role(now))
    }

    #[must_use]
    pub fn is_leader(&self, resource: &ResourceKey) -> bool {
        self.get_role(resource) == Role::Leader
    }

    /// Transition counter of `resource`; 0 when unregistered.
    #[must_use]
    pub fn generation(&self, resource: &ResourceKey) -> u64 {
        self.inner
            .entries
            .read()
            .get(resource)
            .map_or(0, |entry| entry.generation)
    }

    #[must_use]
    pub fn cluster_mode(&self, resource: &ResourceKey) -> Option<ClusterMode> {
        self.inner
            .entries
            .read()
            .get(resource)
            .map(|entry| entry.cluster_mode)
    }

    #[must_use]
    pub fn entry(&self, resource: &ResourceKey) -> Option<RoleEntry> {
        self.inner.entries.read().get(resource).cloned()
    }

    /// Snapshot of every entry, ordered by resource key.
    #[must_use]
    pub fn roles(&self) -> Vec<RoleEntry> {
        let mut entries: Vec<RoleEntry> = self.inner.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.resource.cmp(&b.resource));
        entries
    }

    /// Role events published so far.
    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.inner.transitions.load(Ordering::Relaxed)
    }

    /// The write handle given to the consensus provider.
    #[must_use]
    pub fn writer(&self) -> RoleWriter {
        RoleWriter {
            inner: self.inner.clone(),
        }
    }

    /// Record a resource. Stateless resources are pinned to `FollowerWarm`
    /// immediately and one event is published for them.
    ///
    /// Returns `true` when the resource was not known before.
    pub(crate) async fn declare(
        &self,
        resource: ResourceKey,
        mode: ClusterMode,
    ) -> LeadershipResult<bool> {
        let _order = self.inner.write_order.lock().await;

        let event = {
            let mut entries = self.inner.entries.write();
            if let Some(existing) = entries.get(&resource) {
                if existing.cluster_mode == mode {
                    return Ok(false);
                }
                return Err(LeadershipError::ModeConflict {
                    resource,
                    existing: existing.cluster_mode,
                });
            }

            let mut entry = RoleEntry::unassigned(resource.clone(), mode);
            let event = (mode == ClusterMode::StatelessReadOnly).then(|| {
                entry.role = Role::FollowerWarm;
                entry.generation = 1;
                KernelEvent::LeadershipRoleChanged {
                    resource: resource.clone(),
                    role: Role::FollowerWarm,
                    peer_addr: None,
                    generation: 1,
                }
            });
            entries.insert(resource.clone(), entry);
            event
        };

        info!(resource = %resource, mode = ?mode, "[hk-01] resource registered");
        if let Some(event) = event {
            self.inner.transitions.fetch_add(1, Ordering::Relaxed);
            self.inner.bus.publish(event).await;
        }
        Ok(true)
    }
}

impl RoleView for LeadershipRegistry {
    fn role(&self, resource: &ResourceKey) -> Role {
        self.get_role(resource)
    }

    fn generation(&self, resource: &ResourceKey) -> u64 {
        LeadershipRegistry::generation(self, resource)
    }

    fn cluster_mode(&self, resource: &ResourceKey) -> Option<ClusterMode> {
        LeadershipRegistry::cluster_mode(self, resource)
    }

    fn leader_addr(&self, resource: &ResourceKey) -> Option<String> {
        self.inner
            .entries
            .read()
            .get(resource)
            .and_then(|entry| entry.peer_addr.clone())
    }
}

/// The only write path into the registry.
///
/// Publishes `LeadershipRoleChanged` only when the role or the leader's
/// address actually changes, or when a `Leader` lease has lapsed.
#[derive(Clone)]
pub struct RoleWriter {
    inner: Arc<RegistryInner>,
}

impl RoleWriter {
    /// Apply `update`. Returns `true` if a transition was published.
    pub async fn write(&self, update: RoleUpdate) -> LeadershipResult<bool> {
        let _order = self.inner.write_order.lock().await;
        let now = self.inner.time.now_ms();

        let event = {
            let mut entries = self.inner.entries.write();
            let Some(entry) = entries.get_mut(&update.resource) else {
                return Err(LeadershipError::Unregistered(update.resource));
            };
            if entry.is_pinned() {
                debug!(resource = %update.resource, "[hk-01] ignoring provider write for pinned resource");
                return Err(LeadershipError::Pinned(update.resource));
            }

            // A lapsed lease counts as a transition even if the stored role
            // is unchanged.
            let lapsed = entry.role == Role::Leader && entry.effective_role(now) != Role::Leader;
            entry.lease_until_ms = update.lease_until_ms;
            if !lapsed && entry.role == update.role && entry.peer_addr == update.peer_addr {
                return Ok(false);
            }

            entry.role = update.role;
            entry.peer_addr = update.peer_addr.clone();
            entry.generation += 1;
            KernelEvent::LeadershipRoleChanged {
                resource: update.resource.clone(),
                role: update.role,
                peer_addr: update.peer_addr.clone(),
                generation: entry.generation,
            }
        };

        self.inner.transitions.fetch_add(1, Ordering::Relaxed);
        info!(
            resource = %update.resource,
            role = %update.role,
            peer = ?update.peer_addr,
            "[hk-01] role changed"
        );
        self.inner.bus.publish(event).await;
        Ok(true)
    }
}

/// Registry plus the active consensus strategy, supervised as one component.
pub struct Leadership {
    registry: LeadershipRegistry,
    provider: Arc<dyn ConsensusProvider>,
    running: AtomicBool,
}

impl Leadership {
    pub fn new(registry: LeadershipRegistry, provider: Arc<dyn ConsensusProvider>) -> Self {
        Self {
            registry,
            provider,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &LeadershipRegistry {
        &self.registry
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Register a resource with its cluster mode. Idempotent.
    ///
    /// Stateless resources never reach the provider.
    pub async fn register(&self, resource: ResourceKey, mode: ClusterMode) -> LeadershipResult<()> {
        let fresh = self.registry.declare(resource.clone(), mode).await?;
        if fresh && mode == ClusterMode::Stateful {
            self.provider.track(resource).await?;
        }
        Ok(())
    }

    /// Hand leadership of `resource` to another member.
    pub async fn failover(&self, resource: &ResourceKey) -> LeadershipResult<()> {
        match self.registry.cluster_mode(resource) {
            None => Err(LeadershipError::Unregistered(resource.clone())),
            Some(ClusterMode::StatelessReadOnly) => Err(LeadershipError::Pinned(resource.clone())),
            Some(ClusterMode::Stateful) => {
                warn!(resource = %resource, "[hk-01] manual failover requested");
                self.provider.failover(resource).await
            }
        }
    }

    #[must_use]
    pub fn elections(&self) -> u64 {
        self.provider.elections()
    }
}

#[async_trait]
impl Component for Leadership {
    fn id(&self) -> ComponentId {
        ComponentId::Consensus
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::Consensus)
            .required()
            .described(format!("consensus provider: {}", self.provider.name()))
    }

    async fn start(&self, shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        self.provider
            .start(self.registry.writer(), shutdown)
            .await
            .map_err(|e| {
                ComponentError::new(ComponentId::Consensus, ComponentErrorKind::InitializationFailed, e.to_string())
            })?;
        self.running.store(true, Ordering::SeqCst);
        info!(provider = self.provider.name(), "[hk-01] ✓ consensus provider started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        self.running.store(false, Ordering::SeqCst);
        self.provider.stop().await.map_err(|e| {
            ComponentError::new(ComponentId::Consensus, ComponentErrorKind::ShutdownFailed, e.to_string())
        })
    }

    async fn health_check(&self) -> ComponentStatus {
        if self.running.load(Ordering::SeqCst) {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Stopped
        }
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "component": ComponentId::Consensus.name(),
            "provider": self.provider.name(),
            "elections": self.provider.elections(),
            "transitions": self.registry.transitions(),
        })
    }
}
