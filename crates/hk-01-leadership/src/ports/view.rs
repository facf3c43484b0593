use shared_types::{ClusterMode, ResourceKey, Role};

/// Read side of the registry, consumed by persistence and routing.
///
/// Implementations must fail closed: an unknown resource is `FollowerCold`.
pub trait RoleView: Send + Sync {
    fn role(&self, resource: &ResourceKey) -> Role;

    /// Transition counter; changes whenever the role of `resource` changes.
    fn generation(&self, resource: &ResourceKey) -> u64;

    fn cluster_mode(&self, resource: &ResourceKey) -> Option<ClusterMode>;

    /// Address of the member believed to lead `resource`, if not us.
    fn leader_addr(&self, resource: &ResourceKey) -> Option<String>;

    fn is_leader(&self, resource: &ResourceKey) -> bool {
        self.role(resource) == Role::Leader
    }
}
