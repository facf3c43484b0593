//! # Route Table
//!
//! Endpoints published through the relay, keyed by `(hostname, port, tls)`.
//! Implements [`RemoteResolver`] for the router.
//!
//! | Rule | Enforcement |
//! |------|-------------|
//! | One owner per endpoint | `publish_route` refuses another resource's key |
//! | Republish is idempotent | same owner replaces the local port |
//! | Hostnames are case-insensitive | keys are lowercased |

use parking_lot::RwLock;
use shared_types::{ResourceKey, RouteSpec, TransportMode};
use std::collections::BTreeMap;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::{ResolvedTarget, RouteKey, RouterError, RouterResult};
use crate::ports::RemoteResolver;

pub struct RouteTable {
    routes: RwLock<BTreeMap<RouteKey, ResolvedTarget>>,
    version: watch::Sender<u64>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            routes: RwLock::new(BTreeMap::new()),
            version,
        }
    }

    /// Map `route` to `resource`. Returns the target it replaced.
    pub fn publish_route(
        &self,
        resource: ResourceKey,
        route: &RouteSpec,
    ) -> RouterResult<Option<ResolvedTarget>> {
        if route.hostname.is_empty() || route.port == 0 || route.local_port == 0 {
            return Err(RouterError::InvalidRoute(format!(
                "{}:{} -> {}",
                route.hostname, route.port, route.local_port
            )));
        }
        let key = RouteKey::of(route);
        let target = ResolvedTarget {
            resource,
            local_port: route.local_port,
        };

        let previous = {
            let mut routes = self.routes.write();
            if let Some(existing) = routes.get(&key) {
                if existing.resource != target.resource {
                    return Err(RouterError::Conflict {
                        key: key.to_string(),
                        owner: existing.resource.to_string(),
                    });
                }
                if *existing == target {
                    debug!(route = %key, "[hk-05] route unchanged");
                    return Ok(Some(target));
                }
            }
            routes.insert(key.clone(), target.clone())
        };

        info!(
            route = %key,
            resource = %target.resource,
            local_port = target.local_port,
            "[hk-05] route published"
        );
        self.bump();
        Ok(previous)
    }

    /// Remove one endpoint. Returns whether it existed.
    pub fn withdraw_route(&self, hostname: &str, port: u16, mode: TransportMode) -> bool {
        let key = RouteKey::new(hostname, port, mode);
        let removed = self.routes.write().remove(&key);
        match removed {
            Some(target) => {
                info!(route = %key, resource = %target.resource, "[hk-05] route withdrawn");
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Remove every endpoint of `resource`.
    pub fn withdraw_resource(&self, resource: &ResourceKey) -> usize {
        let removed = {
            let mut routes = self.routes.write();
            let before = routes.len();
            routes.retain(|_, target| &target.resource != resource);
            before - routes.len()
        };
        if removed > 0 {
            info!(%resource, removed, "[hk-05] routes withdrawn");
            self.bump();
        }
        removed
    }

    /// Load persisted routes, skipping invalid or conflicting entries.
    pub fn restore(&self, routes: impl IntoIterator<Item = (ResourceKey, RouteSpec)>) -> usize {
        routes
            .into_iter()
            .filter(|(resource, route)| self.publish_route(resource.clone(), route).is_ok())
            .count()
    }

    #[must_use]
    pub fn get(&self, key: &RouteKey) -> Option<ResolvedTarget> {
        self.routes.read().get(key).cloned()
    }

    #[must_use]
    pub fn routes(&self) -> Vec<(RouteKey, ResolvedTarget)> {
        self.routes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Distinct advertised hostnames, sorted.
    #[must_use]
    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.routes.read().keys().map(|k| k.hostname.clone()).collect();
        names.dedup();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Fires whenever the table changes.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl RemoteResolver for RouteTable {
    fn resolve(&self, hostname: &str, port: u16, is_tls: bool) -> Option<ResolvedTarget> {
        let key = RouteKey::new(hostname, port, TransportMode::from_tls(is_tls));
        self.routes.read().get(&key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(hostname: &str, port: u16, local_port: u16) -> RouteSpec {
        RouteSpec {
            hostname: hostname.into(),
            port,
            mode: TransportMode::Tls,
            local_port,
        }
    }

    fn blog() -> ResourceKey {
        ResourceKey::app("blog").unwrap()
    }

    #[test]
    fn test_publish_resolve_withdraw() {
        let table = RouteTable::new();
        assert!(table
            .publish_route(blog(), &route("Blog.example.com", 443, 8080))
            .unwrap()
            .is_none());

        let target = table.resolve("blog.example.com", 443, true).unwrap();
        assert_eq!(target.resource, blog());
        assert_eq!(target.local_port, 8080);
        assert!(table.resolve("blog.example.com", 443, false).is_none());
        assert!(table.resolve("blog.example.com", 80, true).is_none());

        assert!(table.withdraw_route("blog.example.com", 443, TransportMode::Tls));
        assert!(!table.withdraw_route("blog.example.com", 443, TransportMode::Tls));
        assert!(table.resolve("blog.example.com", 443, true).is_none());
    }

    #[test]
    fn test_other_resource_cannot_take_endpoint() {
        let table = RouteTable::new();
        table.publish_route(blog(), &route("blog.example.com", 443, 8080)).unwrap();

        let err = table
            .publish_route(ResourceKey::app("docs").unwrap(), &route("blog.example.com", 443, 9090))
            .unwrap_err();
        assert!(matches!(err, RouterError::Conflict { .. }));
        assert_eq!(table.resolve("blog.example.com", 443, true).unwrap().local_port, 8080);
    }

    #[test]
    fn test_republish_updates_port() {
        let table = RouteTable::new();
        table.publish_route(blog(), &route("blog.example.com", 443, 8080)).unwrap();
        let previous = table
            .publish_route(blog(), &route("blog.example.com", 443, 8081))
            .unwrap()
            .unwrap();
        assert_eq!(previous.local_port, 8080);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_route_refused() {
        let table = RouteTable::new();
        assert!(table.publish_route(blog(), &route("blog.example.com", 443, 0)).is_err());
        assert!(table.publish_route(blog(), &route("", 443, 80)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_hostnames_and_resource_withdrawal() {
        let table = RouteTable::new();
        table.publish_route(blog(), &route("blog.example.com", 443, 8080)).unwrap();
        table.publish_route(blog(), &route("blog.example.com", 22, 2222)).unwrap();
        table
            .publish_route(ResourceKey::app("docs").unwrap(), &route("docs.example.com", 443, 9090))
            .unwrap();

        assert_eq!(table.hostnames(), vec!["blog.example.com", "docs.example.com"]);
        assert_eq!(table.withdraw_resource(&blog()), 2);
        assert_eq!(table.hostnames(), vec!["docs.example.com"]);
    }

    #[test]
    fn test_changes_fire_only_on_mutation() {
        let table = RouteTable::new();
        let rx = table.changes();
        table.publish_route(blog(), &route("blog.example.com", 443, 8080)).unwrap();
        assert_eq!(*rx.borrow(), 1);
        table.publish_route(blog(), &route("blog.example.com", 443, 8080)).unwrap();
        assert!(!table.withdraw_route("nope.example.com", 443, TransportMode::Tls));
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn test_restore_skips_bad_entries() {
        let table = RouteTable::new();
        let restored = table.restore(vec![
            (blog(), route("blog.example.com", 443, 8080)),
            (blog(), route("broken.example.com", 443, 0)),
        ]);
        assert_eq!(restored, 1);
    }
}
