use async_trait::async_trait;
use shared_types::{ResourceKey, ShutdownSignal};

use crate::domain::LeadershipResult;
use crate::service::RoleWriter;

/// A pluggable consensus strategy.
///
/// The single-node stub and the lease provider share this interface; the rest
/// of the kernel never knows which one is active. A provider writes roles only
/// through the [`RoleWriter`] handed to it in [`start`](Self::start).
#[async_trait]
pub trait ConsensusProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin assigning roles. Background work must end when `shutdown` fires.
    async fn start(&self, writer: RoleWriter, shutdown: ShutdownSignal) -> LeadershipResult<()>;

    /// Stop assigning roles and release anything held.
    async fn stop(&self) -> LeadershipResult<()>;

    /// Start electing for a stateful resource. Idempotent.
    async fn track(&self, resource: ResourceKey) -> LeadershipResult<()>;

    /// Give up leadership of `resource` so another member can take it.
    async fn failover(&self, resource: &ResourceKey) -> LeadershipResult<()>;

    /// Election rounds run so far, across all resources.
    fn elections(&self) -> u64;
}
