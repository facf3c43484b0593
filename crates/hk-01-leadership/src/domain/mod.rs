//! Domain types for the leadership registry.

mod error;

pub use error::{LeadershipError, LeadershipResult};

use serde::{Deserialize, Serialize};
use shared_types::{ClusterMode, ResourceKey, Role};

/// Identifier of a cluster member (device id).
pub type MemberId = String;

/// Current role of this member for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub resource: ResourceKey,
    pub role: Role,
    pub cluster_mode: ClusterMode,
    /// Address of the member believed to lead, when it is not us.
    pub peer_addr: Option<String>,
    /// Incremented on every role transition of this resource.
    pub generation: u64,
    /// Lease deadline (unix millis) backing a `Leader` role.
    pub lease_until_ms: Option<u64>,
}

impl RoleEntry {
    /// Entry for a freshly registered resource: cold, generation 0.
    #[must_use]
    pub fn unassigned(resource: ResourceKey, cluster_mode: ClusterMode) -> Self {
        Self {
            resource,
            role: Role::FollowerCold,
            cluster_mode,
            peer_addr: None,
            generation: 0,
            lease_until_ms: None,
        }
    }

    /// Role as seen at `now_ms`: an expired lease reads as `FollowerCold`.
    #[must_use]
    pub fn effective_role(&self, now_ms: u64) -> Role {
        match (self.role, self.lease_until_ms) {
            (Role::Leader, Some(deadline)) if now_ms >= deadline => Role::FollowerCold,
            (role, _) => role,
        }
    }

    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.cluster_mode == ClusterMode::StatelessReadOnly
    }
}

/// A role write requested by a consensus provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleUpdate {
    pub resource: ResourceKey,
    pub role: Role,
    pub peer_addr: Option<String>,
    pub lease_until_ms: Option<u64>,
}

impl RoleUpdate {
    #[must_use]
    pub fn leader(resource: ResourceKey, lease_until_ms: Option<u64>) -> Self {
        Self {
            resource,
            role: Role::Leader,
            peer_addr: None,
            lease_until_ms,
        }
    }

    #[must_use]
    pub fn cold(resource: ResourceKey, peer_addr: Option<String>) -> Self {
        Self {
            resource,
            role: Role::FollowerCold,
            peer_addr,
            lease_until_ms: None,
        }
    }
}

/// A time-bounded Leader grant held by one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub resource: ResourceKey,
    pub holder: MemberId,
    pub holder_addr: String,
    pub expires_at_ms: u64,
    /// Incremented each time the lease changes hands.
    pub term: u64,
}

impl Lease {
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Outcome of an acquire-or-renew attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseGrant {
    /// We hold the lease until `expires_at_ms`.
    Granted { expires_at_ms: u64, term: u64 },
    /// Another member holds an unexpired lease.
    HeldBy { holder: MemberId, holder_addr: String },
}
