//! # Router
//!
//! Bridges an inbound connection to the service that owns its endpoint.
//!
//! ```text
//!  InboundRequest ──resolve──→ none ──────────────→ NoRoute (nothing dialed)
//!                        │
//!                        └─→ ResolvedTarget ──decide_route──→ Tunnel ──→ NoRoute
//!                                                     │
//!                                                     └─→ Local ──dial──→ copy_bidirectional
//! ```
//!
//! Traffic for a resource led by another member is declined; the decision
//! carries the peer address for callers that log or surface it.

use hk_01_leadership::RoleView;
use serde::Serialize;
use shared_types::{ClusterMode, ResourceKey, Role};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::domain::{InboundRequest, ResolvedTarget, RouteDecision, RouterConfig, RouterError, RouterResult};
use crate::ports::{BoxedStream, Dialer, RemoteResolver};

#[derive(Debug, Default)]
struct Counters {
    local: AtomicU64,
    no_route: AtomicU64,
    tunneled: AtomicU64,
    dial_failures: AtomicU64,
}

/// Point-in-time routing counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub local: u64,
    pub no_route: u64,
    pub tunneled: u64,
    pub dial_failures: u64,
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

struct Inner {
    resolver: Arc<dyn RemoteResolver>,
    roles: Arc<dyn RoleView>,
    dialer: Arc<dyn Dialer>,
    config: RouterConfig,
    counters: Counters,
}

impl Router {
    pub fn new(
        resolver: Arc<dyn RemoteResolver>,
        roles: Arc<dyn RoleView>,
        dialer: Arc<dyn Dialer>,
        config: RouterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                roles,
                dialer,
                config,
                counters: Counters::default(),
            }),
        }
    }

    /// `Local` when this member leads `resource` or the resource is
    /// stateless; otherwise `Tunnel` toward the believed leader.
    #[must_use]
    pub fn decide_route(&self, resource: &ResourceKey) -> RouteDecision {
        let roles = &self.inner.roles;
        if roles.role(resource) == Role::Leader
            || roles.cluster_mode(resource) == Some(ClusterMode::StatelessReadOnly)
        {
            RouteDecision::Local
        } else {
            RouteDecision::Tunnel(roles.leader_addr(resource))
        }
    }

    /// Resolve `request` to a target served on this member.
    pub fn route(&self, request: &InboundRequest) -> RouterResult<ResolvedTarget> {
        let counters = &self.inner.counters;
        let Some(target) =
            self.inner
                .resolver
                .resolve(&request.hostname, request.port, request.is_tls)
        else {
            counters.no_route.fetch_add(1, Ordering::Relaxed);
            debug!(endpoint = %request.key(), "[hk-05] no route");
            return Err(RouterError::NoRoute(request.key().to_string()));
        };

        match self.decide_route(&target.resource) {
            RouteDecision::Local => Ok(target),
            RouteDecision::Tunnel(peer) => {
                counters.tunneled.fetch_add(1, Ordering::Relaxed);
                let peer = peer.unwrap_or_else(|| "unknown".into());
                debug!(
                    endpoint = %request.key(),
                    resource = %target.resource,
                    %peer,
                    "[hk-05] declining stream led by peer"
                );
                Err(RouterError::Tunneled {
                    target: request.key().to_string(),
                    peer,
                })
            }
        }
    }

    /// Route and dial the local service.
    pub async fn connect(&self, request: &InboundRequest) -> RouterResult<(ResolvedTarget, BoxedStream)> {
        let target = self.route(request)?;
        let addr = format!("{}:{}", self.inner.config.local_host, target.local_port);
        let dialed = tokio::time::timeout(self.inner.config.dial_timeout, self.inner.dialer.dial(&addr))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))
            .and_then(|r| r);
        match dialed {
            Ok(stream) => {
                self.inner.counters.local.fetch_add(1, Ordering::Relaxed);
                Ok((target, stream))
            }
            Err(e) => {
                self.inner.counters.dial_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%addr, resource = %target.resource, error = %e, "[hk-05] local dial failed");
                Err(RouterError::Dial {
                    addr,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Serve one inbound connection to completion. Returns bytes copied
    /// `(inbound → local, local → inbound)`.
    pub async fn handle_inbound<S>(&self, request: &InboundRequest, mut inbound: S) -> RouterResult<(u64, u64)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (target, mut local) = self.connect(request).await?;
        let copied = pipe(&mut inbound, &mut local).await;
        debug!(
            endpoint = %request.key(),
            resource = %target.resource,
            ok = copied.is_ok(),
            "[hk-05] stream closed"
        );
        copied
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let c = &self.inner.counters;
        RouterStats {
            local: c.local.load(Ordering::Relaxed),
            no_route: c.no_route.load(Ordering::Relaxed),
            tunneled: c.tunneled.load(Ordering::Relaxed),
            dial_failures: c.dial_failures.load(Ordering::Relaxed),
        }
    }
}

pub(crate) async fn pipe<A, B>(a: &mut A, b: &mut B) -> RouterResult<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin + ?Sized,
    B: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::io::copy_bidirectional(a, b)
        .await
        .map_err(|e| RouterError::Stream(e.to_string()))
}
