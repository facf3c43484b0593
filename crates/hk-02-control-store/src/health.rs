//! Periodic integrity check of the control store.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    ShutdownSignal, StoreHealth,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::{RepairOutcome, StoreResult};
use crate::service::ControlStore;

/// What one health pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another pass was still running.
    Skipped,
    /// Store is locked; nothing to verify.
    Locked,
    Verified,
    Degraded,
    Repaired(RepairOutcome),
}

struct MonitorInner {
    store: ControlStore,
    in_progress: AtomicBool,
    checks: AtomicU64,
    repairs: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Runs `verify_integrity` on a fixed interval and repairs when allowed.
#[derive(Clone)]
pub struct StoreHealthMonitor {
    inner: Arc<MonitorInner>,
}

impl StoreHealthMonitor {
    pub fn new(store: ControlStore) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                store,
                in_progress: AtomicBool::new(false),
                checks: AtomicU64::new(0),
                repairs: AtomicU64::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    #[must_use]
    pub fn checks(&self) -> u64 {
        self.inner.checks.load(Ordering::Relaxed)
    }

    /// One health pass. Overlapping calls return `Skipped` instead of queueing.
    pub async fn check_now(&self) -> StoreResult<CheckOutcome> {
        if self
            .inner
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[hk-02] health check already running, skipping");
            return Ok(CheckOutcome::Skipped);
        }
        let result = self.run_pass().await;
        self.inner.in_progress.store(false, Ordering::Release);
        result
    }

    async fn run_pass(&self) -> StoreResult<CheckOutcome> {
        let store = &self.inner.store;
        if store.is_locked() {
            return Ok(CheckOutcome::Locked);
        }
        self.inner.checks.fetch_add(1, Ordering::Relaxed);

        let report = store.verify_integrity().await?;
        if report.is_ok() {
            return Ok(CheckOutcome::Verified);
        }
        if !store.config().auto_repair {
            warn!(revision = report.revision, "[hk-02] integrity check failed, auto repair disabled");
            return Ok(CheckOutcome::Degraded);
        }

        let outcome = store.repair().await?;
        self.inner.repairs.fetch_add(1, Ordering::Relaxed);
        info!(?outcome, "[hk-02] store repaired");
        Ok(CheckOutcome::Repaired(outcome))
    }
}

#[async_trait]
impl Component for StoreHealthMonitor {
    fn id(&self) -> ComponentId {
        ComponentId::StoreHealth
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::StoreHealth)
            .depends_on(vec![ComponentId::Consensus])
            .described("periodic control store integrity check")
    }

    async fn start(&self, mut shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return Err(ComponentError::new(
                ComponentId::StoreHealth,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }

        let monitor = self.clone();
        let period = self.inner.store.config().health_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = monitor.check_now().await {
                            error!(error = %e, "[hk-02] health check failed");
                        }
                    }
                }
            }
            debug!("[hk-02] health routine stopped");
        }));
        info!(interval_ms = period.as_millis() as u64, "[hk-02] ✓ health routine started");
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
        match self.inner.store.health() {
            StoreHealth::Healthy => ComponentStatus::Healthy,
            StoreHealth::Degraded => ComponentStatus::Degraded,
        }
    }

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({
            "component": ComponentId::StoreHealth.name(),
            "checks": self.checks(),
            "repairs": self.inner.repairs.load(Ordering::Relaxed),
            "revision": self.inner.store.revision(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record_key;
    use crate::service::test_support::harness;
    use shared_bus::{EventFilter, EventTopic, KernelEvent};
    use std::time::Duration;

    async fn seed(store: &ControlStore) {
        let mut tx = store.begin();
        tx.put("apps/photos", b"{}".to_vec());
        store.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_store_verifies() {
        let h = harness().await;
        seed(&h.store).await;
        let monitor = StoreHealthMonitor::new(h.store.clone());
        assert_eq!(monitor.check_now().await.unwrap(), CheckOutcome::Verified);
        assert_eq!(monitor.checks(), 1);
    }

    #[tokio::test]
    async fn test_locked_store_is_not_checked() {
        let h = harness().await;
        h.store.lock().await.unwrap();
        let monitor = StoreHealthMonitor::new(h.store.clone());
        assert_eq!(monitor.check_now().await.unwrap(), CheckOutcome::Locked);
        assert_eq!(monitor.checks(), 0);
    }

    #[tokio::test]
    async fn test_corruption_triggers_repair() {
        let h = harness().await;
        seed(&h.store).await;
        assert!(h.kv.tamper(record_key("apps/photos").as_bytes(), |v| v[0] ^= 0xff));

        let monitor = StoreHealthMonitor::new(h.store.clone());
        let mut sub = h.bus.subscribe(EventFilter::topic(EventTopic::ControlStoreHealth));

        let outcome = monitor.check_now().await.unwrap();
        assert!(matches!(outcome, CheckOutcome::Repaired(RepairOutcome::Rebuilt { .. })));
        assert_eq!(h.store.health(), StoreHealth::Healthy);

        let first = sub.recv().await.unwrap();
        assert!(matches!(
            first.payload,
            KernelEvent::ControlStoreHealth { status: StoreHealth::Degraded, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_runs_and_stops() {
        let h = harness().await;
        let monitor = StoreHealthMonitor::new(h.store.clone());
        let (tx, shutdown) = ShutdownSignal::channel();

        monitor.start(shutdown).await.unwrap();
        assert_eq!(monitor.health_check().await, ComponentStatus::Healthy);

        tokio::time::sleep(h.store.config().health_interval * 3 + Duration::from_millis(5)).await;
        assert!(monitor.checks() >= 2);

        tx.send(true).unwrap();
        monitor.stop().await.unwrap();
        assert_eq!(monitor.health_check().await, ComponentStatus::Stopped);
    }
}
