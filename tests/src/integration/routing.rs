//! Inbound streams without a route are refused before any local dial.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hk_01_leadership::{Leadership, LeadershipRegistry, RoleUpdate, SingleNodeProvider, SystemTimeSource};
use hk_05_router::{BoxedStream, Dialer, InboundRequest, RouteTable, Router, RouterConfig, RouterError};
use shared_bus::InMemoryEventBus;
use shared_types::{
    ClusterMode, Component, ErrorKind, KernelError, ResourceKey, Role, RouteSpec, ShutdownSignal,
    TransportMode,
};

#[derive(Default)]
struct CountingDialer {
    dials: AtomicUsize,
}

#[async_trait]
impl Dialer for CountingDialer {
    async fn dial(&self, _addr: &str) -> std::io::Result<BoxedStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let (near, _far) = tokio::io::duplex(64);
        Ok(Box::new(near))
    }
}

struct Fixture {
    registry: LeadershipRegistry,
    routes: Arc<RouteTable>,
    dialer: Arc<CountingDialer>,
    router: Router,
    _leadership: Leadership,
}

async fn fixture() -> Fixture {
    let bus = Arc::new(InMemoryEventBus::new());
    let registry = LeadershipRegistry::new("solo", bus, Arc::new(SystemTimeSource));
    let leadership = Leadership::new(registry.clone(), Arc::new(SingleNodeProvider::new()));
    let (_tx, shutdown) = ShutdownSignal::channel();
    leadership.start(shutdown).await.unwrap();
    leadership
        .register(ResourceKey::app("blog").unwrap(), ClusterMode::Stateful)
        .await
        .unwrap();

    let routes = Arc::new(RouteTable::new());
    let dialer = Arc::new(CountingDialer::default());
    let router = Router::new(
        routes.clone(),
        Arc::new(registry.clone()),
        dialer.clone(),
        RouterConfig::default(),
    );
    Fixture {
        registry,
        routes,
        dialer,
        router,
        _leadership: leadership,
    }
}

fn blog_route() -> RouteSpec {
    RouteSpec {
        hostname: "blog.example.net".into(),
        port: 443,
        mode: TransportMode::Tls,
        local_port: 8080,
    }
}

#[tokio::test]
async fn test_unknown_hostname_refused_without_dial() {
    let f = fixture().await;
    f.routes
        .publish_route(ResourceKey::app("blog").unwrap(), &blog_route())
        .unwrap();

    let request = InboundRequest::new("unknown.example.net", 443, true);
    let (inbound, _client) = tokio::io::duplex(64);
    let err = f.router.handle_inbound(&request, inbound).await.unwrap_err();

    assert!(matches!(err, RouterError::NoRoute(_)));
    assert_eq!(KernelError::from(err).kind(), ErrorKind::NoRoute);
    assert_eq!(f.dialer.dials.load(Ordering::SeqCst), 0);
    assert_eq!(f.router.stats().no_route, 1);
}

#[tokio::test]
async fn test_port_and_transport_are_part_of_the_route() {
    let f = fixture().await;
    f.routes
        .publish_route(ResourceKey::app("blog").unwrap(), &blog_route())
        .unwrap();

    for request in [
        InboundRequest::new("blog.example.net", 80, false),
        InboundRequest::new("blog.example.net", 443, false),
    ] {
        assert!(matches!(f.router.route(&request), Err(RouterError::NoRoute(_))));
    }
    assert_eq!(f.dialer.dials.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_routed_leader_dials_once() {
    let f = fixture().await;
    f.routes
        .publish_route(ResourceKey::app("blog").unwrap(), &blog_route())
        .unwrap();

    let (target, _stream) = f
        .router
        .connect(&InboundRequest::new("blog.example.net", 443, true))
        .await
        .unwrap();
    assert_eq!(target.local_port, 8080);
    assert_eq!(f.dialer.dials.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_follower_declines_without_dial() {
    let f = fixture().await;
    let blog = ResourceKey::app("blog").unwrap();
    f.routes.publish_route(blog.clone(), &blog_route()).unwrap();
    f.registry
        .writer()
        .write(RoleUpdate::cold(blog.clone(), Some("10.0.0.2:9470".into())))
        .await
        .unwrap();
    assert_eq!(f.registry.get_role(&blog), Role::FollowerCold);

    let err = f
        .router
        .connect(&InboundRequest::new("blog.example.net", 443, true))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RouterError::Tunneled { .. }));
    assert_eq!(KernelError::from(err).kind(), ErrorKind::NoRoute);
    assert_eq!(f.dialer.dials.load(Ordering::SeqCst), 0);
}
