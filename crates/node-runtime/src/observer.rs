//! Mirrors bus traffic and relay counters into the prometheus registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hearth_telemetry::metrics::{
    EVENTS_OBSERVED, IS_LEADER, RELAY_RECONNECTS, RELAY_STREAMS_REFUSED, ROLE_TRANSITIONS,
    STORE_HEALTHY, STORE_LOCKED, STORE_REVISION,
};
use hearth_telemetry::{log_resource_event, register_metrics};
use hk_05_router::{RelayAdapter, RelayStats, Router};
use parking_lot::Mutex;
use shared_bus::{Event, EventFilter, InMemoryEventBus, KernelEvent};
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    Role, ShutdownSignal, StoreHealth,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RELAY_SYNC_INTERVAL: Duration = Duration::from_secs(5);

pub struct MetricsObserver {
    bus: Arc<InMemoryEventBus>,
    relay: RelayAdapter,
    router: Router,
    /// Relay counters already copied into prometheus.
    synced: Arc<Mutex<RelayStats>>,
    observed: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsObserver {
    pub fn new(bus: Arc<InMemoryEventBus>, relay: RelayAdapter, router: Router) -> Self {
        Self {
            bus,
            relay,
            router,
            synced: Arc::new(Mutex::new(RelayStats::default())),
            observed: Arc::new(AtomicU64::new(0)),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::Relaxed)
    }

    /// Copy relay counter growth since the last sync.
    pub fn sync_relay(&self) {
        sync_relay(&self.relay, &self.synced);
    }
}

/// Update gauges and counters for one bus event.
pub fn record(event: &Event) {
    EVENTS_OBSERVED
        .with_label_values(&[&format!("{:?}", event.topic)])
        .inc();

    match &event.payload {
        KernelEvent::LockStateChanged { locked } => {
            STORE_LOCKED.set(if *locked { 1.0 } else { 0.0 });
        }
        KernelEvent::ControlStoreCommit { revision, .. } => {
            STORE_REVISION.set(*revision as f64);
        }
        KernelEvent::ControlStoreHealth { status, .. } => {
            STORE_HEALTHY.set(if *status == StoreHealth::Healthy { 1.0 } else { 0.0 });
        }
        KernelEvent::LeadershipRoleChanged { resource, role, .. } => {
            let resource = resource.to_string();
            ROLE_TRANSITIONS
                .with_label_values(&[resource.as_str(), &role.to_string()])
                .inc();
            IS_LEADER
                .with_label_values(&[resource.as_str()])
                .set(if *role == Role::Leader { 1.0 } else { 0.0 });
        }
        KernelEvent::VolumeRoleChanged {
            resource,
            volume,
            mode,
        } => {
            log_resource_event!(debug, resource, "[observer] volume remounted", volume = %volume, mode = %mode);
        }
        KernelEvent::DiskEvent { .. } | KernelEvent::ExportResult { .. } => {}
    }
}

fn sync_relay(relay: &RelayAdapter, synced: &Mutex<RelayStats>) {
    let now = relay.stats();
    let mut last = synced.lock();

    // Reconnects include rejected sessions; split them by cause.
    let rejected = now.rejections.saturating_sub(last.rejections);
    let lost = now
        .reconnects
        .saturating_sub(last.reconnects)
        .saturating_sub(rejected);
    if lost > 0 {
        RELAY_RECONNECTS.with_label_values(&["lost"]).inc_by(lost as f64);
    }
    if rejected > 0 {
        RELAY_RECONNECTS
            .with_label_values(&["rejected"])
            .inc_by(rejected as f64);
    }
    let refused = now.streams_refused.saturating_sub(last.streams_refused);
    if refused > 0 {
        RELAY_STREAMS_REFUSED.inc_by(refused as f64);
    }
    *last = now;
}

#[async_trait]
impl Component for MetricsObserver {
    fn id(&self) -> ComponentId {
        ComponentId::MetricsObserver
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::MetricsObserver).described("bus events to prometheus")
    }

    async fn start(&self, mut shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        if self.task.lock().is_some() {
            return Err(ComponentError::new(
                ComponentId::MetricsObserver,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }
        if let Err(e) = register_metrics() {
            warn!(error = %e, "[observer] metrics registration failed");
        }

        let mut sub = self.bus.subscribe(EventFilter::all());
        let relay = self.relay.clone();
        let synced = self.synced.clone();
        let observed = self.observed.clone();
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(RELAY_SYNC_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => sync_relay(&relay, &synced),
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        record(&event);
                        observed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            sync_relay(&relay, &synced);
            debug!("[observer] stopped");
        });
        *self.task.lock() = Some(handle);
        info!("[observer] ✓ metrics observer started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    async fn health_check(&self) -> ComponentStatus {
        match self.task.lock().as_ref() {
            Some(handle) if !handle.is_finished() => ComponentStatus::Healthy,
            Some(_) => ComponentStatus::Error,
            None => ComponentStatus::Stopped,
        }
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "component": ComponentId::MetricsObserver.name(),
            "observed": self.observed(),
            "relay": self.relay.stats(),
            "router": self.router.stats(),
        })
    }
}
