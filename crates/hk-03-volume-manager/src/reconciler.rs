//! Remounts volumes when leadership moves.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, KernelEvent};
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    ShutdownSignal,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::VolumeManager;

/// Subscribes to `LeadershipRoleChanged` and reconciles the affected
/// resource's volumes.
pub struct VolumeReconciler {
    manager: VolumeManager,
    bus: Arc<InMemoryEventBus>,
    task: Mutex<Option<JoinHandle<()>>>,
    passes: Arc<AtomicU64>,
}

impl VolumeReconciler {
    pub fn new(manager: VolumeManager, bus: Arc<InMemoryEventBus>) -> Self {
        Self {
            manager,
            bus,
            task: Mutex::new(None),
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Component for VolumeReconciler {
    fn id(&self) -> ComponentId {
        ComponentId::VolumeReconciler
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::VolumeReconciler)
            .depends_on(vec![ComponentId::Consensus])
            .described("remounts volumes on role change")
    }

    async fn start(&self, mut shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        if self.task.lock().is_some() {
            return Err(ComponentError::new(
                ComponentId::VolumeReconciler,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }

        // Subscribe first, then catch up: events before subscription are lost.
        let mut sub = self
            .bus
            .subscribe(EventFilter::topic(EventTopic::LeadershipRoleChanged));
        for owner in self.manager.attached_owners() {
            self.manager.reconcile(&owner).await;
        }

        let manager = self.manager.clone();
        let passes = self.passes.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = sub.recv() => {
                        let Some(event) = event else { break };
                        if let KernelEvent::LeadershipRoleChanged { resource, .. } = event.payload {
                            manager.reconcile(&resource).await;
                            passes.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
            debug!("[hk-03] reconciler stopped");
        });
        *self.task.lock() = Some(handle);
        info!("[hk-03] ✓ volume reconciler started");
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
            "component": ComponentId::VolumeReconciler.name(),
            "passes": self.passes(),
            "volumes": self.manager.list().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::{blog, harness};
    use shared_types::{MountMode, VolumeClass, VolumeOptions, VolumeSpec};
    use std::time::Duration;

    #[tokio::test]
    async fn test_demotion_detaches_and_publishes() {
        let h = harness().await;
        let spec = VolumeSpec::new("blog-data", VolumeClass::Application, VolumeOptions::for_app("blog"));
        h.manager.create_volume(spec).await.unwrap();
        h.manager.attach_volume("blog-data", MountMode::ReadWrite).await.unwrap();

        let reconciler = VolumeReconciler::new(h.manager.clone(), h.bus.clone());
        let (tx, shutdown) = ShutdownSignal::channel();
        reconciler.start(shutdown).await.unwrap();
        let mut sub = h.bus.subscribe(EventFilter::topic(EventTopic::VolumeRoleChanged));

        h.demote(&blog()).await;

        let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("volume event")
            .unwrap();
        assert_eq!(
            event.payload,
            KernelEvent::VolumeRoleChanged {
                resource: blog(),
                volume: "blog-data".into(),
                mode: MountMode::Denied,
            }
        );
        assert!(h.backend.mounted().is_empty());

        tx.send(true).unwrap();
        reconciler.stop().await.unwrap();
        assert_eq!(reconciler.health_check().await, ComponentStatus::Stopped);
    }
}
