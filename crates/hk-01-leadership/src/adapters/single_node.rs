//! Single-member consensus: every tracked resource is led here, forever.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{ResourceKey, ShutdownSignal};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::domain::{LeadershipError, LeadershipResult, RoleUpdate};
use crate::ports::ConsensusProvider;
use crate::service::RoleWriter;

/// Assigns `Leader` to every tracked resource without a lease.
#[derive(Default)]
pub struct SingleNodeProvider {
    writer: Mutex<Option<RoleWriter>>,
    tracked: Mutex<BTreeSet<ResourceKey>>,
    elections: AtomicU64,
}

impl SingleNodeProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn elect(&self, writer: &RoleWriter, resource: ResourceKey) -> LeadershipResult<()> {
        self.elections.fetch_add(1, Ordering::Relaxed);
        writer.write(RoleUpdate::leader(resource, None)).await?;
        Ok(())
    }
}

#[async_trait]
impl ConsensusProvider for SingleNodeProvider {
    fn name(&self) -> &'static str {
        "single-node"
    }

    async fn start(&self, writer: RoleWriter, _shutdown: ShutdownSignal) -> LeadershipResult<()> {
        *self.writer.lock() = Some(writer.clone());
        let pending: Vec<ResourceKey> = self.tracked.lock().iter().cloned().collect();
        for resource in pending {
            self.elect(&writer, resource).await?;
        }
        info!("[hk-01] single-node provider leading all tracked resources");
        Ok(())
    }

    async fn stop(&self) -> LeadershipResult<()> {
        self.writer.lock().take();
        Ok(())
    }

    async fn track(&self, resource: ResourceKey) -> LeadershipResult<()> {
        if !self.tracked.lock().insert(resource.clone()) {
            return Ok(());
        }
        let writer = self.writer.lock().clone();
        match writer {
            Some(writer) => self.elect(&writer, resource).await,
            None => Ok(()),
        }
    }

    async fn failover(&self, resource: &ResourceKey) -> LeadershipResult<()> {
        warn!(resource = %resource, "[hk-01] failover requested with no peer to take over");
        Err(LeadershipError::Provider(
            "single-node provider has no peer to fail over to".to_string(),
        ))
    }

    fn elections(&self) -> u64 {
        self.elections.load(Ordering::Relaxed)
    }
}
