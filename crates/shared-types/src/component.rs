//! # Component Trait
//!
//! Contract every long-lived kernel component implements so the supervisor
//! can start it in dependency order, stop it in reverse, restart it, and
//! propagate cancellation to its background work.
//!
//! ```rust,ignore
//! use shared_types::{Component, ComponentError, ComponentId, ComponentStatus, ShutdownSignal};
//! use async_trait::async_trait;
//!
//! pub struct DiskWatch { /* ... */ }
//!
//! #[async_trait]
//! impl Component for DiskWatch {
//!     fn id(&self) -> ComponentId { ComponentId::DiskMonitor }
//!     async fn start(&self, shutdown: ShutdownSignal) -> Result<(), ComponentError> { Ok(()) }
//!     async fn stop(&self) -> Result<(), ComponentError> { Ok(()) }
//!     async fn health_check(&self) -> ComponentStatus { ComponentStatus::Healthy }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

/// Long-lived components owned by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComponentId {
    /// Consensus provider feeding the leadership registry.
    Consensus,
    /// Control store health routine.
    StoreHealth,
    /// Leadership-driven volume remounts.
    VolumeReconciler,
    /// Free-space polling of the data root.
    DiskMonitor,
    /// Outbound relay connection.
    RelayAdapter,
    /// Bus-to-prometheus bridge.
    MetricsObserver,
    /// Readiness HTTP endpoint.
    Readiness,
}

impl ComponentId {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Consensus => "hk-01-consensus",
            Self::StoreHealth => "hk-02-store-health",
            Self::VolumeReconciler => "hk-03-volume-reconciler",
            Self::DiskMonitor => "hk-03-disk-monitor",
            Self::RelayAdapter => "hk-05-relay-adapter",
            Self::MetricsObserver => "metrics-observer",
            Self::Readiness => "readiness",
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error type for component lifecycle operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentError {
    pub component: ComponentId,
    pub kind: ComponentErrorKind,
    pub message: String,
}

impl ComponentError {
    pub fn new(component: ComponentId, kind: ComponentErrorKind, message: impl Into<String>) -> Self {
        Self {
            component,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}: {}", self.component, self.kind, self.message)
    }
}

impl std::error::Error for ComponentError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentErrorKind {
    InitializationFailed,
    MissingDependency,
    RuntimeError,
    ShutdownFailed,
}

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentStatus {
    Healthy,
    /// Running, but with reduced guarantees (e.g. relay disconnected).
    Degraded,
    Stopped,
    Error,
    Starting,
    ShuttingDown,
}

impl ComponentStatus {
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

/// Metadata used for ordering and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub description: String,
    /// Components that must be running first.
    pub dependencies: Vec<ComponentId>,
    /// Startup fails if this component fails to start.
    pub required: bool,
}

impl ComponentInfo {
    #[must_use]
    pub fn new(id: ComponentId) -> Self {
        Self {
            id,
            description: String::new(),
            dependencies: Vec::new(),
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, deps: Vec<ComponentId>) -> Self {
        self.dependencies = deps;
        self
    }

    #[must_use]
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Cancellation handle given to every background worker.
///
/// Cloned from the supervisor's `watch` channel; fires once.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// A signal paired with its trigger, for tests and standalone workers.
    #[must_use]
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (or the sender is gone).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The lifecycle contract of a supervised component.
#[async_trait]
pub trait Component: Send + Sync {
    fn id(&self) -> ComponentId;

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(self.id())
    }

    /// Start background work. Workers must exit when `shutdown` fires.
    async fn start(&self, shutdown: ShutdownSignal) -> Result<(), ComponentError>;

    /// Stop background work and wait for it to finish.
    async fn stop(&self) -> Result<(), ComponentError>;

    async fn health_check(&self) -> ComponentStatus;

    fn metrics(&self) -> serde_json::Value {
        serde_json::json!({ "component": self.id().name() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_component_info_builder() {
        let info = ComponentInfo::new(ComponentId::VolumeReconciler)
            .required()
            .depends_on(vec![ComponentId::Consensus])
            .described("remounts volumes on role change");

        assert_eq!(info.id, ComponentId::VolumeReconciler);
        assert!(info.required);
        assert_eq!(info.dependencies, vec![ComponentId::Consensus]);
    }

    #[test]
    fn test_component_error_display() {
        let err = ComponentError::new(
            ComponentId::RelayAdapter,
            ComponentErrorKind::InitializationFailed,
            "no relay address",
        );
        assert_eq!(
            err.to_string(),
            "[hk-05-relay-adapter] InitializationFailed: no relay address"
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_fires() {
        let (tx, mut signal) = ShutdownSignal::channel();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_signal_sender_dropped() {
        let (tx, mut signal) = ShutdownSignal::channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .expect("dropped sender counts as shutdown");
    }
}
