//! # Supervisor
//!
//! Owns every long-lived kernel component and its lifecycle.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Supervisor                          │
//! │                                                              │
//! │   register()  ──→  start_order()  (dependency topo sort)     │
//! │                          │                                   │
//! │                          ▼                                   │
//! │   hk-01-consensus ─→ hk-02-store-health ─→ hk-03-... ─→ ...  │
//! │                          │                                   │
//! │              ShutdownSignal (watch::Receiver<bool>)          │
//! │                          │                                   │
//! │   stop_all()  ──→  signal fires, stop() in reverse order     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A required component that fails to start aborts startup and everything
//! already started is stopped again. Optional components that fail are
//! marked `Error` and their dependents are skipped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    ShutdownSignal,
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("component {0} registered twice")]
    Duplicate(ComponentId),

    #[error("{component} depends on {dependency}, which is not registered")]
    MissingDependency {
        component: ComponentId,
        dependency: ComponentId,
    },

    #[error("dependency cycle among {0:?}")]
    Cycle(Vec<ComponentId>),

    #[error("component {0} is not registered")]
    Unknown(ComponentId),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Component(#[from] ComponentError),

    #[error("{} component(s) failed to stop", .0.len())]
    Shutdown(Vec<ComponentError>),
}

struct Entry {
    component: Arc<dyn Component>,
    info: ComponentInfo,
}

/// Starts components in dependency order and stops them in reverse.
pub struct Supervisor {
    /// Registration order is the tie-break for the start order.
    entries: RwLock<Vec<Entry>>,
    status: RwLock<HashMap<ComponentId, ComponentStatus>>,
    /// Components actually started, in start order.
    started: Mutex<Vec<ComponentId>>,
    shutdown: watch::Sender<bool>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            entries: RwLock::new(Vec::new()),
            status: RwLock::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn register(&self, component: Arc<dyn Component>) -> Result<(), SupervisorError> {
        let info = component.info();
        let id = info.id;
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.info.id == id) {
            return Err(SupervisorError::Duplicate(id));
        }
        info!(
            component = %id,
            required = info.required,
            deps = ?info.dependencies,
            "[supervisor] registering component"
        );
        entries.push(Entry { component, info });
        self.status.write().insert(id, ComponentStatus::Stopped);
        Ok(())
    }

    /// A fresh cancellation handle tied to this supervisor.
    #[must_use]
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal::new(self.shutdown.subscribe())
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    #[must_use]
    pub fn get(&self, id: ComponentId) -> Option<Arc<dyn Component>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.info.id == id)
            .map(|e| e.component.clone())
    }

    #[must_use]
    pub fn status(&self, id: ComponentId) -> Option<ComponentStatus> {
        self.status.read().get(&id).copied()
    }

    /// Dependency order (Kahn), ties broken by registration order.
    pub fn start_order(&self) -> Result<Vec<ComponentId>, SupervisorError> {
        let entries = self.entries.read();
        let position: HashMap<ComponentId, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.info.id, i))
            .collect();

        let mut pending: BTreeMap<usize, usize> = BTreeMap::new();
        let mut dependents: HashMap<ComponentId, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            for dep in &entry.info.dependencies {
                if !position.contains_key(dep) {
                    return Err(SupervisorError::MissingDependency {
                        component: entry.info.id,
                        dependency: *dep,
                    });
                }
                dependents.entry(*dep).or_default().push(i);
            }
            pending.insert(i, entry.info.dependencies.len());
        }

        let mut order = Vec::with_capacity(entries.len());
        while let Some(next) = pending
            .iter()
            .find(|(_, remaining)| **remaining == 0)
            .map(|(i, _)| *i)
        {
            pending.remove(&next);
            let id = entries[next].info.id;
            order.push(id);
            for dependent in dependents.get(&id).into_iter().flatten() {
                if let Some(remaining) = pending.get_mut(dependent) {
                    *remaining -= 1;
                }
            }
        }

        if pending.is_empty() {
            Ok(order)
        } else {
            Err(SupervisorError::Cycle(
                pending.keys().map(|i| entries[*i].info.id).collect(),
            ))
        }
    }

    /// Start everything. On a required failure, stops what already started.
    pub async fn start_all(&self) -> Result<(), SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let order = self.start_order()?;
        info!(components = order.len(), "[supervisor] starting components");

        for id in order {
            let Some((component, info)) = self.entry(id) else {
                continue;
            };

            let blocked = info
                .dependencies
                .iter()
                .find(|dep| !self.status(**dep).is_some_and(ComponentStatus::is_running));
            if let Some(dep) = blocked {
                let err = ComponentError::new(
                    id,
                    ComponentErrorKind::MissingDependency,
                    format!("{dep} is not running"),
                );
                self.fail(&info, err).await?;
                continue;
            }

            self.set_status(id, ComponentStatus::Starting);
            match component.start(self.signal()).await {
                Ok(()) => {
                    self.started.lock().push(id);
                    let status = component.health_check().await;
                    self.set_status(id, status);
                    info!(component = %id, ?status, "[supervisor] ✓ component started");
                }
                Err(err) => self.fail(&info, err).await?,
            }
        }

        self.print_status();
        Ok(())
    }

    /// Fire the shutdown signal and stop components in reverse start order.
    pub async fn stop_all(&self) -> Result<(), SupervisorError> {
        self.shutdown.send_replace(true);
        info!("[supervisor] shutting down components");

        let started: Vec<ComponentId> = std::mem::take(&mut *self.started.lock());
        let mut errors = Vec::new();
        for id in started.into_iter().rev() {
            let Some((component, _)) = self.entry(id) else {
                continue;
            };
            self.set_status(id, ComponentStatus::ShuttingDown);
            match component.stop().await {
                Ok(()) => {
                    self.set_status(id, ComponentStatus::Stopped);
                    info!(component = %id, "[supervisor] component stopped");
                }
                Err(err) => {
                    error!(component = %id, error = %err, "[supervisor] component failed to stop");
                    self.set_status(id, ComponentStatus::Error);
                    errors.push(err);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::Shutdown(errors))
        }
    }

    /// Stop and start one component in place.
    pub async fn restart(&self, id: ComponentId) -> Result<(), SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let (component, _) = self.entry(id).ok_or(SupervisorError::Unknown(id))?;

        warn!(component = %id, "[supervisor] restarting component");
        self.set_status(id, ComponentStatus::ShuttingDown);
        component.stop().await?;
        self.started.lock().retain(|started| *started != id);

        self.set_status(id, ComponentStatus::Starting);
        if let Err(err) = component.start(self.signal()).await {
            self.set_status(id, ComponentStatus::Error);
            return Err(err.into());
        }
        self.started.lock().push(id);
        let status = component.health_check().await;
        self.set_status(id, status);
        info!(component = %id, ?status, "[supervisor] ✓ component restarted");
        Ok(())
    }

    /// Poll every component's health and record it.
    pub async fn health(&self) -> Vec<(ComponentId, ComponentStatus)> {
        let components: Vec<(ComponentId, Arc<dyn Component>)> = self
            .entries
            .read()
            .iter()
            .map(|e| (e.info.id, e.component.clone()))
            .collect();

        let mut report = Vec::with_capacity(components.len());
        for (id, component) in components {
            let status = component.health_check().await;
            self.set_status(id, status);
            report.push((id, status));
        }
        report
    }

    /// All required components running, at last observation.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let status = self.status.read();
        self.entries
            .read()
            .iter()
            .filter(|e| e.info.required)
            .all(|e| status.get(&e.info.id).is_some_and(|s| s.is_running()))
    }

    #[must_use]
    pub fn metrics(&self) -> serde_json::Value {
        let status = self.status.read();
        let components: Vec<serde_json::Value> = self
            .entries
            .read()
            .iter()
            .map(|e| {
                serde_json::json!({
                    "id": e.info.id.name(),
                    "status": status.get(&e.info.id),
                    "required": e.info.required,
                    "metrics": e.component.metrics(),
                })
            })
            .collect();
        serde_json::json!({ "components": components })
    }

    pub fn print_status(&self) {
        info!("===========================================");
        info!("  KERNEL COMPONENT STATUS");
        info!("===========================================");

        let status = self.status.read();
        for entry in self.entries.read().iter() {
            let state = status
                .get(&entry.info.id)
                .copied()
                .unwrap_or(ComponentStatus::Stopped);
            let icon = match state {
                ComponentStatus::Healthy => "✅",
                ComponentStatus::Degraded => "⚠️ ",
                ComponentStatus::Error => "❌",
                ComponentStatus::Stopped => "⏹️ ",
                ComponentStatus::Starting | ComponentStatus::ShuttingDown => "⏳",
            };
            let marker = if entry.info.required { " [REQUIRED]" } else { "" };
            info!("  {} {:26} {:?}{}", icon, entry.info.id.name(), state, marker);
        }

        info!("===========================================");
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn entry(&self, id: ComponentId) -> Option<(Arc<dyn Component>, ComponentInfo)> {
        self.entries
            .read()
            .iter()
            .find(|e| e.info.id == id)
            .map(|e| (e.component.clone(), e.info.clone()))
    }

    fn set_status(&self, id: ComponentId, status: ComponentStatus) {
        self.status.write().insert(id, status);
    }

    /// Record a start failure. Required components unwind startup.
    async fn fail(&self, info: &ComponentInfo, err: ComponentError) -> Result<(), SupervisorError> {
        self.set_status(info.id, ComponentStatus::Error);
        if !info.required {
            warn!(component = %info.id, error = %err, "[supervisor] optional component failed to start");
            return Ok(());
        }

        error!(component = %info.id, error = %err, "[supervisor] required component failed, aborting startup");
        if let Err(stop_err) = self.stop_all().await {
            warn!(error = %stop_err, "[supervisor] cleanup after failed startup was incomplete");
        }
        Err(err.into())
    }
}
