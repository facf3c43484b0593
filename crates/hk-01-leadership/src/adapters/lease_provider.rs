//! Lease-based multi-member consensus.
//!
//! ```text
//!  member A ──acquire_or_renew──┐
//!                               ├──→ LeaseArbiter (quorum stand-in)
//!  member B ──acquire_or_renew──┘
//!
//!  Granted        → Leader (lease_until = deadline)
//!  HeldBy(peer)   → FollowerCold (peer_addr = holder)
//!  Unavailable    → keep Leader until deadline, then FollowerCold
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{ResourceKey, ShutdownSignal};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{LeaseGrant, LeadershipError, LeadershipResult, MemberId, RoleUpdate};
use crate::ports::{ConsensusProvider, LeaseArbiter, TimeSource};
use crate::service::RoleWriter;

/// Lease timing. `renew_interval` must be well below `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    pub ttl: Duration,
    pub renew_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6),
            renew_interval: Duration::from_secs(2),
        }
    }
}

impl LeaseConfig {
    #[must_use]
    pub fn ttl_ms(&self) -> u64 {
        u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX)
    }
}

struct LeaseCore {
    member_id: MemberId,
    member_addr: String,
    arbiter: Arc<dyn LeaseArbiter>,
    time: Arc<dyn TimeSource>,
    config: LeaseConfig,
    writer: Mutex<Option<RoleWriter>>,
    /// Tracked resources and the deadline of the lease we hold, if any.
    held: Mutex<BTreeMap<ResourceKey, Option<u64>>>,
    /// Resources we stepped down from, with the time we may compete again.
    yielded: Mutex<HashMap<ResourceKey, u64>>,
    /// Serializes ticks; a tick never overlaps another.
    tick_order: tokio::sync::Mutex<()>,
    elections: AtomicU64,
}

impl LeaseCore {
    async fn tick(&self) {
        let _order = self.tick_order.lock().await;
        let Some(writer) = self.writer.lock().clone() else {
            return;
        };
        let resources: Vec<ResourceKey> = self.held.lock().keys().cloned().collect();
        for resource in resources {
            self.tick_resource(&writer, &resource).await;
        }
    }

    async fn tick_resource(&self, writer: &RoleWriter, resource: &ResourceKey) {
        let now = self.time.now_ms();
        let yielding = self
            .yielded
            .lock()
            .get(resource)
            .is_some_and(|until| now < *until);

        let update = if yielding {
            let holder = self.current_holder_addr(resource).await;
            RoleUpdate::cold(resource.clone(), holder)
        } else {
            let was_holder = self.held.lock().get(resource).copied().flatten().is_some();
            match self
                .arbiter
                .acquire_or_renew(resource, &self.member_id, &self.member_addr, self.config.ttl_ms())
                .await
            {
                Ok(LeaseGrant::Granted { expires_at_ms, term }) => {
                    // Renewals are not elections.
                    if !was_holder {
                        self.elections.fetch_add(1, Ordering::Relaxed);
                    }
                    self.set_held(resource, Some(expires_at_ms));
                    debug!(resource = %resource, term, "[hk-01] lease held");
                    RoleUpdate::leader(resource.clone(), Some(expires_at_ms))
                }
                Ok(LeaseGrant::HeldBy { holder, holder_addr }) => {
                    self.set_held(resource, None);
                    debug!(resource = %resource, holder = %holder, "[hk-01] lease held by peer");
                    RoleUpdate::cold(resource.clone(), Some(holder_addr))
                }
                Err(e) => {
                    let deadline = self.held.lock().get(resource).copied().flatten();
                    match deadline {
                        Some(deadline) if now < deadline => {
                            warn!(
                                resource = %resource,
                                remaining_ms = deadline - now,
                                error = %e,
                                "[hk-01] cannot renew lease, leading until deadline"
                            );
                            return;
                        }
                        _ => {
                            warn!(resource = %resource, error = %e, "[hk-01] arbiter unreachable, demoting");
                            self.set_held(resource, None);
                            RoleUpdate::cold(resource.clone(), None)
                        }
                    }
                }
            }
        };

        if let Err(e) = writer.write(update).await {
            debug!(resource = %resource, error = %e, "[hk-01] role write skipped");
        }
    }

    async fn current_holder_addr(&self, resource: &ResourceKey) -> Option<String> {
        let now = self.time.now_ms();
        match self.arbiter.current(resource).await {
            Ok(Some(lease)) if !lease.is_expired(now) && lease.holder != self.member_id => {
                Some(lease.holder_addr)
            }
            _ => None,
        }
    }

    fn set_held(&self, resource: &ResourceKey, deadline: Option<u64>) {
        if let Some(slot) = self.held.lock().get_mut(resource) {
            *slot = deadline;
        }
    }
}

/// Members compete for a per-resource lease held by a shared arbiter.
pub struct LeaseConsensusProvider {
    core: Arc<LeaseCore>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaseConsensusProvider {
    pub fn new(
        member_id: impl Into<MemberId>,
        member_addr: impl Into<String>,
        arbiter: Arc<dyn LeaseArbiter>,
        time: Arc<dyn TimeSource>,
        config: LeaseConfig,
    ) -> Self {
        Self {
            core: Arc::new(LeaseCore {
                member_id: member_id.into(),
                member_addr: member_addr.into(),
                arbiter,
                time,
                config,
                writer: Mutex::new(None),
                held: Mutex::new(BTreeMap::new()),
                yielded: Mutex::new(HashMap::new()),
                tick_order: tokio::sync::Mutex::new(()),
                elections: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> LeaseConfig {
        self.core.config
    }

    /// Run one acquire/renew round for every tracked resource.
    ///
    /// The background loop calls this every `renew_interval`; tests driving
    /// a manual clock call it directly.
    pub async fn tick(&self) {
        self.core.tick().await;
    }
}

#[async_trait]
impl ConsensusProvider for LeaseConsensusProvider {
    fn name(&self) -> &'static str {
        "lease"
    }

    async fn start(&self, writer: RoleWriter, mut shutdown: ShutdownSignal) -> LeadershipResult<()> {
        *self.core.writer.lock() = Some(writer);

        let core = self.core.clone();
        let interval = core.config.renew_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => core.tick().await,
                }
            }
            debug!("[hk-01] lease loop stopped");
        });
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }

        info!(
            member = %self.core.member_id,
            ttl_ms = self.core.config.ttl_ms(),
            "[hk-01] lease provider started"
        );
        Ok(())
    }

    async fn stop(&self) -> LeadershipResult<()> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        let _order = self.core.tick_order.lock().await;
        let writer = self.core.writer.lock().take();
        let held: Vec<ResourceKey> = self
            .core
            .held
            .lock()
            .iter()
            .filter(|(_, deadline)| deadline.is_some())
            .map(|(resource, _)| resource.clone())
            .collect();

        for resource in held {
            if let Err(e) = self.core.arbiter.release(&resource, &self.core.member_id).await {
                warn!(resource = %resource, error = %e, "[hk-01] lease release failed on stop");
            }
            self.core.set_held(&resource, None);
            if let Some(writer) = &writer {
                if let Err(e) = writer.write(RoleUpdate::cold(resource.clone(), None)).await {
                    debug!(resource = %resource, error = %e, "[hk-01] demotion on stop not recorded");
                }
            }
        }
        Ok(())
    }

    async fn track(&self, resource: ResourceKey) -> LeadershipResult<()> {
        {
            let mut held = self.core.held.lock();
            if held.contains_key(&resource) {
                return Ok(());
            }
            held.insert(resource.clone(), None);
        }
        let _order = self.core.tick_order.lock().await;
        let writer = self.core.writer.lock().clone();
        if let Some(writer) = writer {
            self.core.tick_resource(&writer, &resource).await;
        }
        Ok(())
    }

    async fn failover(&self, resource: &ResourceKey) -> LeadershipResult<()> {
        if !self.core.held.lock().contains_key(resource) {
            return Err(LeadershipError::Unregistered(resource.clone()));
        }
        let _order = self.core.tick_order.lock().await;
        self.core
            .arbiter
            .release(resource, &self.core.member_id)
            .await?;
        self.core.set_held(resource, None);

        let until = self.core.time.now_ms().saturating_add(self.core.config.ttl_ms());
        self.core.yielded.lock().insert(resource.clone(), until);

        let writer = self.core.writer.lock().clone();
        if let Some(writer) = writer {
            writer.write(RoleUpdate::cold(resource.clone(), None)).await?;
        }
        info!(resource = %resource, "[hk-01] stepped down for failover");
        Ok(())
    }

    fn elections(&self) -> u64 {
        self.core.elections.load(Ordering::Relaxed)
    }
}
