//! Free-space polling of the data root.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{EventPublisher, KernelEvent};
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    DiskStatus, ShutdownSignal,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::VolumeConfig;
use crate::ports::SpaceProbe;

struct MonitorInner {
    config: VolumeConfig,
    probe: Arc<dyn SpaceProbe>,
    bus: Arc<dyn EventPublisher>,
    last: Mutex<Option<DiskStatus>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Publishes `DiskEvent` whenever the data root's status changes.
#[derive(Clone)]
pub struct DiskMonitor {
    inner: Arc<MonitorInner>,
}

impl DiskMonitor {
    pub fn new(config: VolumeConfig, probe: Arc<dyn SpaceProbe>, bus: Arc<dyn EventPublisher>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                probe,
                bus,
                last: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn last_status(&self) -> Option<DiskStatus> {
        *self.inner.last.lock()
    }

    /// Probe once; publish if the status changed.
    pub async fn poll_now(&self) -> DiskStatus {
        let root = &self.inner.config.data_root;
        let (status, available) = match self.inner.probe.space(root) {
            Ok(space) => (self.inner.config.classify(space.available, space.total), space.available),
            Err(e) => {
                warn!(path = %root.display(), error = %e, "[hk-03] disk probe failed");
                (DiskStatus::Unavailable, 0)
            }
        };

        let previous = self.inner.last.lock().replace(status);
        if previous != Some(status) {
            match status {
                DiskStatus::Ok => info!(available, "[hk-03] data root space ok"),
                _ => warn!(available, ?status, "[hk-03] data root space {:?}", status),
            }
            self.inner
                .bus
                .publish(KernelEvent::DiskEvent {
                    disk: root.display().to_string(),
                    status,
                    available_bytes: available,
                })
                .await;
        }
        status
    }
}

#[async_trait]
impl Component for DiskMonitor {
    fn id(&self) -> ComponentId {
        ComponentId::DiskMonitor
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::DiskMonitor).described("data root free-space polling")
    }

    async fn start(&self, mut shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return Err(ComponentError::new(
                ComponentId::DiskMonitor,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }
        let monitor = self.clone();
        let period = self.inner.config.disk_poll_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        monitor.poll_now().await;
                    }
                }
            }
            debug!("[hk-03] disk monitor stopped");
        }));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        Ok(())
    }

    async fn health_check(&self) -> ComponentStatus {
        if self.inner.task.lock().is_none() {
            return ComponentStatus::Stopped;
        }
        match self.last_status() {
            Some(DiskStatus::Ok) | None => ComponentStatus::Healthy,
            Some(_) => ComponentStatus::Degraded,
        }
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "component": ComponentId::DiskMonitor.name(),
            "status": self.last_status(),
        })
    }
}
