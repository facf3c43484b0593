//! # Command Dispatcher
//!
//! Single entry point for every kernel command.
//!
//! ```text
//!  CommandEnvelope ──→ shutting down? ──→ envelope.verify() ──→ validate()
//!                                                                  │
//!                                    target resource ◄─────────────┘
//!                                          │
//!                          per-resource tokio::sync::Mutex
//!                                          │
//!                  preconditions: leadership → store health → lock state
//!                                          │
//!                                          ▼
//!       hk-01 (register, failover) · hk-02 (unlock, lock, recovery)
//!       hk-03 (volumes) · hk-04 (export, import) · hk-05 (routes)
//!                                          │
//!                                          ▼
//!                      CommandResult{correlation_id, ok, error, output}
//! ```
//!
//! A command whose preconditions fail never reaches its module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hearth_telemetry::metrics::{COMMANDS_DISPATCHED, COMMAND_DURATION};
use hearth_telemetry::log_command;
use hk_01_leadership::Leadership;
use hk_02_control_store::{
    AppStateRecord, AppStateRepository, AuditRepository, ControlStore, SecretsRepository,
};
use hk_03_volume_manager::{CreateOutcome, VolumeManager};
use hk_04_export_manager::ExportManager;
use hk_05_router::{ResolvedTarget, RouteKey, RouteTable};
use parking_lot::Mutex;
use shared_types::{
    unix_now, ClusterMode, Command, CommandEnvelope, CommandOutput, CommandResult, KernelError,
    ResourceKey, RouteSpec, StoreHealth, TransportMode, VolumeClass, VolumeSpec,
};
use tracing::{debug, info, warn};

/// What must hold before a command reaches its module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Preconditions {
    /// This member must lead the resource.
    pub leader_of: Option<ResourceKey>,
    pub store_healthy: bool,
    pub store_unlocked: bool,
}

impl Preconditions {
    /// Table of requirements per command kind.
    #[must_use]
    pub fn for_command(command: &Command, resource: &ResourceKey) -> Self {
        let kernel_write = Self {
            leader_of: Some(ResourceKey::Kernel),
            store_healthy: true,
            store_unlocked: true,
        };
        match command {
            Command::CreateVolume { .. } => kernel_write,
            Command::RunExport { .. } => Self {
                store_healthy: true,
                store_unlocked: true,
                ..Self::default()
            },
            Command::AcknowledgeRecovery => Self {
                leader_of: Some(ResourceKey::Kernel),
                store_unlocked: true,
                ..Self::default()
            },
            Command::Failover { .. } => Self {
                leader_of: Some(resource.clone()),
                ..Self::default()
            },
            Command::AttachVolume { .. }
            | Command::DetachVolume { .. }
            | Command::PublishRoute { .. }
            | Command::WithdrawRoute { .. }
            | Command::Unlock { .. }
            | Command::Lock
            | Command::RegisterResource { .. } => Self::default(),
            // Reinstating a node usually happens while it follows; the
            // restored store stays read-only until unlock either way.
            Command::Import { .. } => Self::default(),
        }
    }
}

/// Validates commands and routes them to the owning module.
pub struct CommandDispatcher {
    leadership: Arc<Leadership>,
    store: ControlStore,
    volumes: VolumeManager,
    exports: Arc<ExportManager>,
    routes: Arc<RouteTable>,
    locks: Mutex<HashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>>,
    shutting_down: AtomicBool,
}

impl CommandDispatcher {
    pub fn new(
        leadership: Arc<Leadership>,
        store: ControlStore,
        volumes: VolumeManager,
        exports: Arc<ExportManager>,
        routes: Arc<RouteTable>,
    ) -> Self {
        Self {
            leadership,
            store,
            volumes,
            exports,
            routes,
            locks: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// From now on every command fails with `ShuttingDown`.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("[dispatch] refusing new commands, shutdown in progress");
        }
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Run one command to completion. Never panics on bad input; every
    /// failure is reported in the result.
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> CommandResult {
        let started = Instant::now();
        let name = envelope.command.name();
        let correlation_id = envelope.correlation_id;

        let result = match self.execute(envelope).await {
            Ok(output) => {
                log_command!(info, correlation_id, name, "[dispatch] command completed");
                CommandResult::success(correlation_id, output)
            }
            Err(err) => {
                log_command!(
                    warn,
                    correlation_id,
                    name,
                    "[dispatch] command failed",
                    error = %err,
                    kind = %err.kind()
                );
                CommandResult::failure(correlation_id, &err)
            }
        };

        let outcome = result.error.map_or_else(|| "ok".to_string(), |kind| kind.to_string());
        COMMANDS_DISPATCHED
            .with_label_values(&[name, outcome.as_str()])
            .inc();
        COMMAND_DURATION
            .with_label_values(&[name])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn execute(&self, envelope: CommandEnvelope) -> Result<CommandOutput, KernelError> {
        if self.is_shutting_down() {
            return Err(KernelError::ShuttingDown);
        }
        envelope.verify(unix_now())?;
        let CommandEnvelope {
            correlation_id,
            command,
            ..
        } = envelope;
        command.validate()?;

        let resource = self.target_resource(&command)?;
        let lock = self.resource_lock(&resource);
        let _guard = lock.lock().await;
        if self.is_shutting_down() {
            return Err(KernelError::ShuttingDown);
        }

        log_command!(debug, correlation_id, command.name(), "[dispatch] command accepted", resource = %resource);
        self.check(&Preconditions::for_command(&command, &resource))?;
        self.apply(command, resource).await
    }

    // =========================================================================
    // PRECONDITIONS
    // =========================================================================

    /// Resource a command is serialized on.
    fn target_resource(&self, command: &Command) -> Result<ResourceKey, KernelError> {
        match command {
            Command::CreateVolume { class, name, opts } => {
                VolumeSpec::new(name.clone(), *class, opts.clone()).owner()
            }
            Command::AttachVolume { name, .. } | Command::DetachVolume { name } => self
                .volumes
                .get(name)
                .ok_or_else(|| KernelError::not_found(format!("volume {name}")))?
                .spec
                .owner(),
            Command::PublishRoute { resource, .. }
            | Command::RegisterResource { resource, .. }
            | Command::Failover { resource } => Ok(resource.clone()),
            // Same lock as PublishRoute for the owner, since both rewrite
            // its app record.
            Command::WithdrawRoute {
                hostname,
                port,
                mode,
            } => Ok(self
                .routes
                .get(&RouteKey::new(hostname, *port, *mode))
                .map_or(ResourceKey::Kernel, |target| target.resource)),
            Command::RunExport { .. }
            | Command::Import { .. }
            | Command::Unlock { .. }
            | Command::Lock
            | Command::AcknowledgeRecovery => Ok(ResourceKey::Kernel),
        }
    }

    /// Leadership, then store health, then lock state.
    pub fn check(&self, pre: &Preconditions) -> Result<(), KernelError> {
        if let Some(resource) = &pre.leader_of {
            if !self.leadership.registry().is_leader(resource) {
                return Err(KernelError::not_leader(resource));
            }
        }
        if pre.store_healthy && self.store.health() != StoreHealth::Healthy {
            return Err(KernelError::StoreUnhealthy {
                detail: self
                    .store
                    .health_detail()
                    .unwrap_or_else(|| "integrity check failed".to_string()),
            });
        }
        if pre.store_unlocked && self.store.is_locked() {
            return Err(KernelError::Locked {
                detail: "control store is locked".into(),
            });
        }
        Ok(())
    }

    fn resource_lock(&self, resource: &ResourceKey) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(resource.clone()).or_default().clone()
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    async fn apply(&self, command: Command, resource: ResourceKey) -> Result<CommandOutput, KernelError> {
        match command {
            Command::CreateVolume { class, name, opts } => {
                let outcome = self
                    .volumes
                    .create_volume(VolumeSpec::new(name.clone(), class, opts))
                    .await?;
                if outcome == CreateOutcome::Created && class == VolumeClass::Bootstrap {
                    SecretsRepository::new(self.store.clone())
                        .ensure_volume_key(&name)
                        .await?;
                }
                Ok(CommandOutput::Done)
            }
            Command::AttachVolume { name, mode } => {
                let attachment = self.volumes.attach_volume(&name, mode).await?;
                Ok(CommandOutput::Volume {
                    name: attachment.name,
                    mode: attachment.mode,
                })
            }
            Command::DetachVolume { name } => {
                self.volumes.detach_volume(&name).await?;
                Ok(CommandOutput::Done)
            }
            Command::RunExport { kind } => {
                let outcome = self.exports.run_export(kind).await?;
                Ok(CommandOutput::Export {
                    path: outcome.path,
                    manifest: manifest_json(&outcome.manifest)?,
                })
            }
            Command::Import { path } => {
                let manifest = self.exports.import(&path).await?;
                Ok(CommandOutput::Export {
                    path,
                    manifest: manifest_json(&manifest)?,
                })
            }
            Command::PublishRoute { route, .. } => {
                self.publish_route(resource, route).await?;
                Ok(CommandOutput::Done)
            }
            Command::WithdrawRoute {
                hostname,
                port,
                mode,
            } => {
                self.withdraw_route(&resource, &hostname, port, mode).await?;
                Ok(CommandOutput::Done)
            }
            Command::Unlock { credential } => {
                self.store.unlock(&credential).await?;
                self.after_unlock().await;
                Ok(CommandOutput::Done)
            }
            Command::Lock => {
                self.store.lock().await?;
                Ok(CommandOutput::Done)
            }
            Command::RegisterResource { mode, .. } => {
                self.leadership.register(resource.clone(), mode).await?;
                self.record_app(&resource, mode).await?;
                Ok(CommandOutput::Done)
            }
            Command::Failover { .. } => {
                self.leadership.failover(&resource).await?;
                self.audit("failover", &resource.to_string()).await;
                Ok(CommandOutput::Done)
            }
            Command::AcknowledgeRecovery => {
                self.store.acknowledge_recovery().await?;
                self.audit("acknowledge_recovery", "store recovery acknowledged").await;
                Ok(CommandOutput::Done)
            }
        }
    }

    // =========================================================================
    // ROUTES
    // =========================================================================

    /// Unregistered owners are refused: routing to an unknown resource
    /// could never resolve a leader.
    async fn publish_route(&self, resource: ResourceKey, route: RouteSpec) -> Result<(), KernelError> {
        if self.leadership.registry().cluster_mode(&resource).is_none() {
            return Err(KernelError::not_found(format!("resource {resource}")));
        }

        let previous = self.routes.publish_route(resource.clone(), &route)?;
        if let Err(err) = self.persist_routes(&resource).await {
            // Undo so the table never holds a route the store refused.
            match previous {
                Some(prev) => {
                    let restored = RouteSpec {
                        local_port: prev.local_port,
                        ..route
                    };
                    self.routes.publish_route(prev.resource, &restored)?;
                }
                None => {
                    self.routes
                        .withdraw_route(&route.hostname, route.port, route.mode);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    /// Withdrawing an absent route is a no-op success.
    async fn withdraw_route(
        &self,
        owner: &ResourceKey,
        hostname: &str,
        port: u16,
        mode: TransportMode,
    ) -> Result<(), KernelError> {
        let key = RouteKey::new(hostname, port, mode);
        let Some(target) = self.routes.get(&key) else {
            debug!(route = %key, "[dispatch] route already withdrawn");
            return Ok(());
        };
        if target.resource != *owner {
            return Err(KernelError::Conflict {
                detail: format!("route {key} moved to {} while queued", target.resource),
            });
        }

        self.routes.withdraw_route(hostname, port, mode);
        if let Err(err) = self.persist_routes(owner).await {
            self.routes
                .publish_route(target.resource.clone(), &route_spec(key, &target))?;
            return Err(err);
        }
        Ok(())
    }

    /// Write `resource`'s current routes into its app record.
    ///
    /// Only the kernel leader with a ready store persists; elsewhere the
    /// table is runtime-only and is restored from the store after unlock.
    async fn persist_routes(&self, resource: &ResourceKey) -> Result<(), KernelError> {
        let Some(app) = resource.app_name() else {
            debug!(resource = %resource, "[dispatch] kernel routes are not persisted");
            return Ok(());
        };
        if !self.store_writable() {
            debug!(resource = %resource, "[dispatch] store not writable, route kept in memory");
            return Ok(());
        }

        let repo = AppStateRepository::new(self.store.clone());
        let mode = self
            .leadership
            .registry()
            .cluster_mode(resource)
            .unwrap_or(ClusterMode::Stateful);
        let mut record = repo.get(app)?.unwrap_or_else(|| AppStateRecord::new(app, mode));
        record.routes = self
            .routes
            .routes()
            .into_iter()
            .filter(|(_, target)| target.resource == *resource)
            .map(|(key, target)| route_spec(key, &target))
            .collect();
        repo.save(&record).await?;
        Ok(())
    }

    // =========================================================================
    // FOLLOW-UPS
    // =========================================================================

    /// Store the desired state of a newly registered app.
    async fn record_app(&self, resource: &ResourceKey, mode: ClusterMode) -> Result<(), KernelError> {
        let Some(app) = resource.app_name() else {
            return Ok(());
        };
        if !self.store_writable() {
            return Ok(());
        }
        let repo = AppStateRepository::new(self.store.clone());
        match repo.get(app)? {
            Some(existing) if existing.cluster_mode == mode => Ok(()),
            Some(existing) => Err(KernelError::Conflict {
                detail: format!(
                    "app {app} recorded as {:?}, registered as {mode:?}",
                    existing.cluster_mode
                ),
            }),
            None => {
                repo.save(&AppStateRecord::new(app, mode)).await?;
                Ok(())
            }
        }
    }

    /// Bring in-memory state back in line with the store after an unlock:
    /// volume catalog, bootstrap volumes, registered apps and their routes.
    async fn after_unlock(&self) {
        if let Err(e) = self.volumes.load_catalog() {
            warn!(error = %e, "[dispatch] volume catalog not loaded after unlock");
        }
        match self
            .volumes
            .rebuild_bootstrap(&SecretsRepository::new(self.store.clone()))
            .await
        {
            Ok(attached) => debug!(volumes = attached.len(), "[dispatch] bootstrap volumes rebuilt"),
            Err(e) => warn!(error = %e, "[dispatch] bootstrap volumes not rebuilt"),
        }

        let apps = match AppStateRepository::new(self.store.clone()).list() {
            Ok(apps) => apps,
            Err(e) => {
                warn!(error = %e, "[dispatch] app records unreadable after unlock");
                return;
            }
        };
        let mut restored = 0;
        for app in apps {
            let resource = match ResourceKey::app(&app.name) {
                Ok(resource) => resource,
                Err(e) => {
                    warn!(app = %app.name, error = %e, "[dispatch] skipping app record");
                    continue;
                }
            };
            if let Err(e) = self.leadership.register(resource.clone(), app.cluster_mode).await {
                warn!(resource = %resource, error = %e, "[dispatch] app not re-registered");
                continue;
            }
            restored += self
                .routes
                .restore(app.routes.into_iter().map(|route| (resource.clone(), route)));
        }
        info!(routes = restored, "[dispatch] desired state restored after unlock");
    }

    async fn audit(&self, action: &str, detail: &str) {
        if !self.store_writable() {
            return;
        }
        if let Err(e) = AuditRepository::new(self.store.clone())
            .append("operator", action, detail)
            .await
        {
            warn!(action, error = %e, "[dispatch] audit entry not written");
        }
    }

    fn store_writable(&self) -> bool {
        self.store.is_ready() && self.leadership.registry().is_leader(&ResourceKey::Kernel)
    }
}

fn route_spec(key: RouteKey, target: &ResolvedTarget) -> RouteSpec {
    RouteSpec {
        hostname: key.hostname,
        port: key.port,
        mode: TransportMode::from_tls(key.is_tls),
        local_port: target.local_port,
    }
}

fn manifest_json<T: serde::Serialize>(manifest: &T) -> Result<serde_json::Value, KernelError> {
    serde_json::to_value(manifest).map_err(|e| KernelError::Internal(e.to_string()))
}
