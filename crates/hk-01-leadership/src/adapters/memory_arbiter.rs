//! In-process lease arbiter shared by simulated members.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::ResourceKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{Lease, LeaseGrant, LeadershipError, LeadershipResult, MemberId};
use crate::ports::{LeaseArbiter, TimeSource};

/// Lease table held in memory. Members marked partitioned cannot reach it.
pub struct InMemoryLeaseArbiter {
    leases: Mutex<HashMap<ResourceKey, Lease>>,
    partitioned: Mutex<HashSet<MemberId>>,
    time: Arc<dyn TimeSource>,
}

impl InMemoryLeaseArbiter {
    pub fn new(time: Arc<dyn TimeSource>) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            partitioned: Mutex::new(HashSet::new()),
            time,
        }
    }

    /// Cut `member` off from (or reconnect it to) the arbiter.
    pub fn set_partitioned(&self, member: &str, partitioned: bool) {
        let mut set = self.partitioned.lock();
        if partitioned {
            set.insert(member.to_string());
        } else {
            set.remove(member);
        }
    }

    #[must_use]
    pub fn holder(&self, resource: &ResourceKey) -> Option<MemberId> {
        let now = self.time.now_ms();
        self.leases
            .lock()
            .get(resource)
            .filter(|lease| !lease.is_expired(now))
            .map(|lease| lease.holder.clone())
    }

    fn reachable(&self, member: &str) -> LeadershipResult<()> {
        if self.partitioned.lock().contains(member) {
            return Err(LeadershipError::ArbiterUnavailable(format!(
                "member {member} is partitioned"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseArbiter for InMemoryLeaseArbiter {
    async fn acquire_or_renew(
        &self,
        resource: &ResourceKey,
        member: &str,
        member_addr: &str,
        ttl_ms: u64,
    ) -> LeadershipResult<LeaseGrant> {
        self.reachable(member)?;
        let now = self.time.now_ms();
        let expires_at_ms = now.saturating_add(ttl_ms);
        let mut leases = self.leases.lock();

        let term = match leases.get_mut(resource) {
            Some(lease) if !lease.is_expired(now) => {
                if lease.holder != member {
                    return Ok(LeaseGrant::HeldBy {
                        holder: lease.holder.clone(),
                        holder_addr: lease.holder_addr.clone(),
                    });
                }
                lease.expires_at_ms = expires_at_ms;
                return Ok(LeaseGrant::Granted {
                    expires_at_ms,
                    term: lease.term,
                });
            }
            Some(lease) => lease.term + 1,
            None => 1,
        };

        leases.insert(
            resource.clone(),
            Lease {
                resource: resource.clone(),
                holder: member.to_string(),
                holder_addr: member_addr.to_string(),
                expires_at_ms,
                term,
            },
        );
        Ok(LeaseGrant::Granted {
            expires_at_ms,
            term,
        })
    }

    async fn release(&self, resource: &ResourceKey, member: &str) -> LeadershipResult<()> {
        self.reachable(member)?;
        // Expire rather than remove, so the next holder moves past the term.
        if let Some(lease) = self
            .leases
            .lock()
            .get_mut(resource)
            .filter(|lease| lease.holder == member)
        {
            lease.expires_at_ms = 0;
        }
        Ok(())
    }

    async fn current(&self, resource: &ResourceKey) -> LeadershipResult<Option<Lease>> {
        Ok(self.leases.lock().get(resource).cloned())
    }
}
