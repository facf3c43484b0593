//! # Relay Adapter
//!
//! Keeps one outbound control connection to the relay and serves the
//! streams it announces through the [`Router`].
//!
//! ```text
//!  connect ─→ Hello{fresh token} ─→ Accepted ─→ serve OpenStream frames
//!     ▲                 │                              │
//!     │             Rejected                    lost / routes changed
//!     │                 │                              │
//!     └── retry now (first rejection),  ◄──────────────┘
//!         else capped exponential backoff
//! ```
//!
//! Relay state never affects local routing; a disconnected relay only
//! reports `Degraded` health.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    ShutdownSignal,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{InboundRequest, RelayConfig, RelayError, RelayState, WireError};
use crate::ports::{BoxedStream, Dialer, TokenProvider};
use crate::route_table::RouteTable;
use crate::router::{pipe, Router};
use crate::wire::{expect_frame, read_frame, write_frame, Frame};

/// Point-in-time relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RelayStats {
    pub sessions: u64,
    pub reconnects: u64,
    pub rejections: u64,
    pub streams_opened: u64,
    pub streams_refused: u64,
}

#[derive(Default)]
struct Counters {
    sessions: AtomicU64,
    reconnects: AtomicU64,
    rejections: AtomicU64,
    streams_opened: AtomicU64,
    streams_refused: AtomicU64,
}

/// How an accepted session ended.
#[derive(Debug)]
enum SessionEnd {
    Lost(String),
    RoutesChanged,
}

/// Reconnect pacing. Only the first rejection after a stable session is
/// retried at once; every other retry doubles the delay up to
/// `backoff_max`. A session that stayed up `stable_after` starts over.
#[derive(Debug, Default)]
struct Reconnect {
    attempt: u32,
    rejected: bool,
}

impl Reconnect {
    fn after_session(&mut self, config: &RelayConfig, end: &SessionEnd, uptime: Duration) -> Duration {
        if uptime >= config.stable_after {
            *self = Self::default();
        }
        match end {
            SessionEnd::RoutesChanged => Duration::ZERO,
            SessionEnd::Lost(_) => self.next_delay(config),
        }
    }

    fn after_rejection(&mut self, config: &RelayConfig) -> Duration {
        if self.rejected {
            self.next_delay(config)
        } else {
            self.rejected = true;
            Duration::ZERO
        }
    }

    fn after_failure(&mut self, config: &RelayConfig) -> Duration {
        self.next_delay(config)
    }

    fn next_delay(&mut self, config: &RelayConfig) -> Duration {
        let delay = config.backoff(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}

struct RelayInner {
    config: RelayConfig,
    router: Router,
    routes: Arc<RouteTable>,
    tokens: Arc<dyn TokenProvider>,
    dialer: Arc<dyn Dialer>,
    state: RwLock<RelayState>,
    counters: Counters,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RelayAdapter {
    inner: Arc<RelayInner>,
}

impl RelayAdapter {
    pub fn new(
        config: RelayConfig,
        router: Router,
        routes: Arc<RouteTable>,
        tokens: Arc<dyn TokenProvider>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let state = if config.relay_addr.is_some() {
            RelayState::Disconnected
        } else {
            RelayState::Disabled
        };
        Self {
            inner: Arc::new(RelayInner {
                config,
                router,
                routes,
                tokens,
                dialer,
                state: RwLock::new(state),
                counters: Counters::default(),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> RelayState {
        self.inner.state.read().clone()
    }

    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let c = &self.inner.counters;
        RelayStats {
            sessions: c.sessions.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            rejections: c.rejections.load(Ordering::Relaxed),
            streams_opened: c.streams_opened.load(Ordering::Relaxed),
            streams_refused: c.streams_refused.load(Ordering::Relaxed),
        }
    }
}

impl RelayInner {
    fn set_state(&self, state: RelayState) {
        *self.state.write() = state;
    }

    async fn run(self: Arc<Self>, addr: String, mut shutdown: ShutdownSignal) {
        let mut changes = self.routes.changes();
        let mut streams = JoinSet::new();
        let mut pacing = Reconnect::default();

        loop {
            self.set_state(RelayState::Connecting);
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.session(&addr, &mut changes, &mut streams) => outcome,
            };

            let delay = match outcome {
                Ok((end, uptime)) => {
                    self.set_state(RelayState::Disconnected);
                    match &end {
                        SessionEnd::RoutesChanged => {
                            info!("[hk-05] advertised hostnames changed, re-authenticating");
                        }
                        SessionEnd::Lost(reason) => {
                            warn!(%reason, ?uptime, "[hk-05] relay session lost");
                        }
                    }
                    pacing.after_session(&self.config, &end, uptime)
                }
                Err(RelayError::Unauthenticated(reason)) => {
                    self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                    let delay = pacing.after_rejection(&self.config);
                    warn!(%reason, retry_in = ?delay, "[hk-05] relay rejected token");
                    self.set_state(RelayState::Unauthenticated(reason));
                    delay
                }
                Err(e) => {
                    self.set_state(RelayState::Disconnected);
                    let delay = pacing.after_failure(&self.config);
                    warn!(error = %e, retry_in = ?delay, "[hk-05] relay connect failed");
                    delay
                }
            };

            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        streams.shutdown().await;
        if self.config.relay_addr.is_some() {
            self.set_state(RelayState::Disconnected);
        }
        debug!("[hk-05] relay adapter stopped");
    }

    /// One control connection: handshake, then serve until it ends.
    /// Errors are returned only before the relay accepted us.
    async fn session(
        self: &Arc<Self>,
        addr: &str,
        changes: &mut watch::Receiver<u64>,
        streams: &mut JoinSet<()>,
    ) -> Result<(SessionEnd, Duration), RelayError> {
        let mut control = self
            .dialer
            .dial(addr)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;

        changes.borrow_and_update();
        let hostnames = self.routes.hostnames();
        let token = self.tokens.issue(&hostnames)?;
        write_frame(&mut control, &Frame::Hello { token }).await?;

        let reply = tokio::time::timeout(self.config.handshake_timeout, expect_frame(&mut control))
            .await
            .map_err(|_| RelayError::Connect("handshake timed out".into()))??;
        let session_id = match reply {
            Frame::Accepted { session_id } => session_id,
            Frame::Rejected { reason } => return Err(RelayError::Unauthenticated(reason)),
            other => {
                return Err(WireError::Unexpected {
                    expected: "accepted",
                    got: other.name().to_string(),
                }
                .into())
            }
        };

        let established = Instant::now();
        self.counters.sessions.fetch_add(1, Ordering::Relaxed);
        self.set_state(RelayState::Connected);
        info!(%session_id, hostnames = hostnames.len(), "[hk-05] ✓ relay session established");

        let (read_half, write_half) = tokio::io::split(control);
        let (in_tx, mut in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::channel(64);
        let io = SessionIo {
            reader: tokio::spawn(read_loop(read_half, in_tx)),
            writer: tokio::spawn(write_loop(write_half, out_rx)),
        };

        let end = loop {
            tokio::select! {
                frame = in_rx.recv() => match frame {
                    Some(Ok(Frame::OpenStream { stream_id, hostname, port, is_tls })) => {
                        let request = InboundRequest::new(hostname, port, is_tls);
                        streams.spawn(Arc::clone(self).serve_stream(
                            addr.to_string(),
                            stream_id,
                            request,
                            out_tx.clone(),
                        ));
                    }
                    Some(Ok(Frame::Ping { nonce })) => {
                        if out_tx.send(Frame::Pong { nonce }).await.is_err() {
                            break SessionEnd::Lost("control writer closed".into());
                        }
                    }
                    Some(Ok(other)) => {
                        debug!(frame = other.name(), "[hk-05] ignoring unexpected frame");
                    }
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("relay closed the connection".into()),
                },
                Ok(()) = changes.changed() => {
                    if self.routes.hostnames() != hostnames {
                        break SessionEnd::RoutesChanged;
                    }
                }
                Some(_) = streams.join_next(), if !streams.is_empty() => {}
            }
        };
        drop(io);
        Ok((end, established.elapsed()))
    }

    /// Route one announced stream; refuse it on the control connection if
    /// it cannot be served here.
    async fn serve_stream(
        self: Arc<Self>,
        addr: String,
        stream_id: u64,
        request: InboundRequest,
        control: mpsc::Sender<Frame>,
    ) {
        let (target, mut local) = match self.router.connect(&request).await {
            Ok(connected) => connected,
            Err(e) => {
                self.refuse(&control, stream_id, e.to_string()).await;
                return;
            }
        };

        let mut data: BoxedStream = match self.dialer.dial(&addr).await {
            Ok(data) => data,
            Err(e) => {
                warn!(stream_id, error = %e, "[hk-05] data connection failed");
                self.refuse(&control, stream_id, format!("data connection failed: {e}")).await;
                return;
            }
        };
        if let Err(e) = write_frame(&mut data, &Frame::Attach { stream_id }).await {
            warn!(stream_id, error = %e, "[hk-05] attach failed");
            return;
        }

        self.counters.streams_opened.fetch_add(1, Ordering::Relaxed);
        debug!(stream_id, endpoint = %request.key(), resource = %target.resource, "[hk-05] stream attached");
        match pipe(&mut data, &mut local).await {
            Ok((up, down)) => debug!(stream_id, up, down, "[hk-05] stream finished"),
            Err(e) => debug!(stream_id, error = %e, "[hk-05] stream ended with error"),
        }
    }

    async fn refuse(&self, control: &mpsc::Sender<Frame>, stream_id: u64, reason: String) {
        self.counters.streams_refused.fetch_add(1, Ordering::Relaxed);
        debug!(stream_id, %reason, "[hk-05] refusing stream");
        let _ = control.send(Frame::Refuse { stream_id, reason }).await;
    }
}

/// Reader and writer halves of an accepted control connection.
/// Dropping it closes the connection.
struct SessionIo {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Drop for SessionIo {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop<S>(mut half: ReadHalf<S>, tx: mpsc::Sender<Result<Frame, WireError>>)
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        let next = match read_frame(&mut half).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => return,
            Err(e) => Err(e),
        };
        let failed = next.is_err();
        if tx.send(next).await.is_err() || failed {
            return;
        }
    }
}

async fn write_loop<S>(mut half: WriteHalf<S>, mut rx: mpsc::Receiver<Frame>)
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_frame(&mut half, &frame).await {
            debug!(error = %e, "[hk-05] control write failed");
            return;
        }
    }
}

#[async_trait]
impl Component for RelayAdapter {
    fn id(&self) -> ComponentId {
        ComponentId::RelayAdapter
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::RelayAdapter)
            .depends_on(vec![ComponentId::Consensus])
            .described("outbound relay control connection")
    }

    async fn start(&self, shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        let Some(addr) = self.inner.config.relay_addr.clone() else {
            info!("[hk-05] relay disabled, serving local routes only");
            return Ok(());
        };
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return Err(ComponentError::new(
                ComponentId::RelayAdapter,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }
        info!(relay = %addr, device = %self.inner.config.device_id, "[hk-05] ✓ relay adapter started");
        *task = Some(tokio::spawn(Arc::clone(&self.inner).run(addr, shutdown)));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        if self.inner.config.relay_addr.is_some() {
            self.inner.set_state(RelayState::Disconnected);
        }
        Ok(())
    }

    async fn health_check(&self) -> ComponentStatus {
        let state = self.state();
        if state == RelayState::Disabled {
            return ComponentStatus::Healthy;
        }
        if self.inner.task.lock().is_none() {
            return ComponentStatus::Stopped;
        }
        match state {
            RelayState::Connected => ComponentStatus::Healthy,
            _ => ComponentStatus::Degraded,
        }
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "component": ComponentId::RelayAdapter.name(),
            "state": self.state(),
            "relay": self.stats(),
            "router": self.inner.router.stats(),
            "routes": self.inner.routes.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::RecordingDialer;
    use crate::adapters::TcpDialer;
    use crate::domain::RouterConfig;
    use crate::token::{verify_token, SignedTokenProvider};
    use hk_01_leadership::{Leadership, LeadershipRegistry, SingleNodeProvider, SystemTimeSource, TimeSource};
    use shared_bus::InMemoryEventBus;
    use shared_crypto::{Ed25519KeyPair, Ed25519PublicKey};
    use shared_types::{ClusterMode, ResourceKey, RouteSpec, TransportMode};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        adapter: RelayAdapter,
        routes: Arc<RouteTable>,
        local: Arc<RecordingDialer>,
        relay: TcpListener,
        key: Ed25519PublicKey,
        _shutdown: watch::Sender<bool>,
        _leadership: Leadership,
    }

    fn blog() -> ResourceKey {
        ResourceKey::app("blog").unwrap()
    }

    fn route(hostname: &str) -> RouteSpec {
        RouteSpec {
            hostname: hostname.into(),
            port: 443,
            mode: TransportMode::Tls,
            local_port: 8080,
        }
    }

    async fn harness() -> Harness {
        harness_with(Duration::from_secs(30)).await
    }

    async fn harness_with(backoff_base: Duration) -> Harness {
        let bus = Arc::new(InMemoryEventBus::new());
        let registry = LeadershipRegistry::new("node-1", bus, Arc::new(SystemTimeSource));
        let leadership = Leadership::new(registry.clone(), Arc::new(SingleNodeProvider::new()));
        let (tx, shutdown) = ShutdownSignal::channel();
        leadership.start(shutdown.clone()).await.unwrap();
        leadership.register(blog(), ClusterMode::Stateful).await.unwrap();

        let relay = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let routes = Arc::new(RouteTable::new());
        routes.publish_route(blog(), &route("blog.example.com")).unwrap();
        let local = RecordingDialer::new();
        let router = Router::new(routes.clone(), Arc::new(registry), local.clone(), RouterConfig::default());

        let keypair = Ed25519KeyPair::generate();
        let key = keypair.public_key();
        let tokens = SignedTokenProvider::new(
            "node-1",
            keypair,
            Duration::from_secs(300),
            Arc::new(SystemTimeSource),
        );
        let config = RelayConfig {
            relay_addr: Some(relay.local_addr().unwrap().to_string()),
            device_id: "node-1".into(),
            backoff_base,
            ..RelayConfig::default()
        };
        let adapter = RelayAdapter::new(
            config,
            router,
            routes.clone(),
            Arc::new(tokens),
            Arc::new(TcpDialer::default()),
        );
        adapter.start(shutdown).await.unwrap();
        Harness {
            adapter,
            routes,
            local,
            relay,
            key,
            _shutdown: tx,
            _leadership: leadership,
        }
    }

    fn now_secs() -> u64 {
        SystemTimeSource.now_ms() / 1000
    }

    /// Accept a control connection and return it with the presented token.
    async fn accept_hello(relay: &TcpListener) -> (TcpStream, String) {
        let (mut socket, _) = timeout(WAIT, relay.accept()).await.unwrap().unwrap();
        match expect_frame(&mut socket).await.unwrap() {
            Frame::Hello { token } => (socket, token),
            other => panic!("expected hello, got {other:?}"),
        }
    }

    async fn accept_session(relay: &TcpListener) -> (TcpStream, String) {
        let (mut socket, token) = accept_hello(relay).await;
        write_frame(&mut socket, &Frame::Accepted { session_id: "s-1".into() })
            .await
            .unwrap();
        (socket, token)
    }

    async fn wait_for_state(adapter: &RelayAdapter, want: RelayState) {
        timeout(WAIT, async {
            while adapter.state() != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_handshake_presents_valid_token() {
        let h = harness().await;
        let (_control, token) = accept_session(&h.relay).await;

        let claims = verify_token(&token, &h.key, now_secs()).unwrap();
        assert_eq!(claims.device_id, "node-1");
        assert_eq!(claims.hostnames, vec!["blog.example.com"]);

        wait_for_state(&h.adapter, RelayState::Connected).await;
        assert_eq!(h.adapter.health_check().await, ComponentStatus::Healthy);
        h.adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_host_refused_without_dial() {
        let h = harness().await;
        let (mut control, _) = accept_session(&h.relay).await;

        write_frame(
            &mut control,
            &Frame::OpenStream {
                stream_id: 9,
                hostname: "nobody.example.com".into(),
                port: 443,
                is_tls: true,
            },
        )
        .await
        .unwrap();

        let reply = timeout(WAIT, expect_frame(&mut control)).await.unwrap().unwrap();
        assert!(matches!(reply, Frame::Refuse { stream_id: 9, .. }));
        assert_eq!(h.local.dial_count(), 0);
        assert_eq!(h.adapter.stats().streams_refused, 1);
        h.adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_stream_attaches_and_pipes() {
        let h = harness().await;
        let (mut control, _) = accept_session(&h.relay).await;

        write_frame(
            &mut control,
            &Frame::OpenStream {
                stream_id: 4,
                hostname: "blog.example.com".into(),
                port: 443,
                is_tls: true,
            },
        )
        .await
        .unwrap();

        let (mut data, _) = timeout(WAIT, h.relay.accept()).await.unwrap().unwrap();
        assert_eq!(expect_frame(&mut data).await.unwrap(), Frame::Attach { stream_id: 4 });

        data.write_all(b"ping").await.unwrap();
        let mut service = h.local.take_peer().unwrap();
        let mut buf = [0u8; 4];
        timeout(WAIT, service.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"ping");

        service.write_all(b"pong").await.unwrap();
        timeout(WAIT, data.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"pong");
        assert_eq!(h.adapter.stats().streams_opened, 1);
        h.adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_retries_immediately_with_fresh_token() {
        let h = harness().await;
        let (mut first, first_token) = accept_hello(&h.relay).await;
        write_frame(&mut first, &Frame::Rejected { reason: "expired".into() })
            .await
            .unwrap();

        // Backoff base is 30s; the retry must not wait for it.
        let (_second, second_token) = accept_session(&h.relay).await;
        assert_ne!(first_token, second_token);
        verify_token(&second_token, &h.key, now_secs()).unwrap();

        wait_for_state(&h.adapter, RelayState::Connected).await;
        assert_eq!(h.adapter.stats().rejections, 1);
        h.adapter.stop().await.unwrap();
    }

    #[test]
    fn test_reconnect_pacing() {
        let config = RelayConfig {
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(8),
            stable_after: Duration::from_secs(30),
            ..RelayConfig::default()
        };
        let secs = Duration::from_secs;
        let brief = Duration::from_millis(10);
        let lost = SessionEnd::Lost("eof".into());
        let mut pacing = Reconnect::default();

        assert_eq!(pacing.after_rejection(&config), Duration::ZERO);
        assert_eq!(pacing.after_rejection(&config), secs(1));
        assert_eq!(pacing.after_rejection(&config), secs(2));

        // Accepted then dropped at once: still backing off.
        assert_eq!(pacing.after_session(&config, &lost, brief), secs(4));
        assert_eq!(pacing.after_session(&config, &lost, brief), secs(8));
        assert_eq!(pacing.after_session(&config, &lost, brief), secs(8));
        assert_eq!(pacing.after_failure(&config), secs(8));

        // A stable session starts over.
        assert_eq!(pacing.after_session(&config, &lost, secs(60)), secs(1));
        assert_eq!(pacing.after_rejection(&config), Duration::ZERO);
        assert_eq!(
            pacing.after_session(&config, &SessionEnd::RoutesChanged, secs(60)),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_repeated_rejections_back_off() {
        let h = harness_with(Duration::from_millis(200)).await;
        let started = tokio::time::Instant::now();
        let window = Duration::from_millis(1_100);

        // Dials land near 0, 0, 200ms and 600ms; the next waits until 1.4s.
        let mut dials = Vec::new();
        let mut sockets = Vec::new();
        loop {
            let remaining = window.saturating_sub(started.elapsed());
            let Ok(accepted) = timeout(remaining, h.relay.accept()).await else {
                break;
            };
            let (mut socket, _) = accepted.unwrap();
            expect_frame(&mut socket).await.unwrap();
            write_frame(&mut socket, &Frame::Rejected { reason: "revoked".into() })
                .await
                .unwrap();
            dials.push(started.elapsed());
            sockets.push(socket);
        }

        assert_eq!(dials.len(), 4, "dials at {dials:?}");
        assert!(dials[1] < Duration::from_millis(150), "first rejection retried at once: {dials:?}");
        assert!(dials[3] - dials[2] > dials[2] - dials[1], "delay must grow: {dials:?}");
        h.adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_route_change_reauthenticates() {
        let h = harness().await;
        let (_control, _) = accept_session(&h.relay).await;
        wait_for_state(&h.adapter, RelayState::Connected).await;

        h.routes
            .publish_route(ResourceKey::app("docs").unwrap(), &route("docs.example.com"))
            .unwrap();

        let (_control, token) = accept_session(&h.relay).await;
        let claims = verify_token(&token, &h.key, now_secs()).unwrap();
        assert_eq!(claims.hostnames, vec!["blog.example.com", "docs.example.com"]);
        h.adapter.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_and_disabled() {
        let h = harness().await;
        let (_control, _) = accept_session(&h.relay).await;
        h.adapter.stop().await.unwrap();
        assert_eq!(h.adapter.health_check().await, ComponentStatus::Stopped);

        let disabled = RelayAdapter::new(
            RelayConfig::default(),
            Router::new(
                h.routes.clone(),
                Arc::new(LeadershipRegistry::new(
                    "node-2",
                    Arc::new(InMemoryEventBus::new()),
                    Arc::new(SystemTimeSource),
                )),
                h.local.clone(),
                RouterConfig::default(),
            ),
            h.routes.clone(),
            Arc::new(SignedTokenProvider::new(
                "node-2",
                Ed25519KeyPair::generate(),
                Duration::from_secs(60),
                Arc::new(SystemTimeSource),
            )),
            Arc::new(TcpDialer::default()),
        );
        let (_tx, shutdown) = ShutdownSignal::channel();
        disabled.start(shutdown).await.unwrap();
        assert_eq!(disabled.state(), RelayState::Disabled);
        assert_eq!(disabled.health_check().await, ComponentStatus::Healthy);
    }
}
