use async_trait::async_trait;
use shared_types::ResourceKey;

use crate::domain::{Lease, LeaseGrant, LeadershipResult};

/// Grants time-bounded leases; at most one unexpired lease per resource.
///
/// An `Err(ArbiterUnavailable)` means this member cannot reach a quorum.
#[async_trait]
pub trait LeaseArbiter: Send + Sync {
    /// Acquire the lease if free or expired, renew it if already ours.
    async fn acquire_or_renew(
        &self,
        resource: &ResourceKey,
        member: &str,
        member_addr: &str,
        ttl_ms: u64,
    ) -> LeadershipResult<LeaseGrant>;

    /// Release the lease if `member` holds it.
    async fn release(&self, resource: &ResourceKey, member: &str) -> LeadershipResult<()>;

    /// Current lease, expired or not.
    async fn current(&self, resource: &ResourceKey) -> LeadershipResult<Option<Lease>>;
}
