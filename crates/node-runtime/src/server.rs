//! # Readiness Server
//!
//! Plain HTTP endpoints for orchestrators and scrapers:
//!
//! | Path | Meaning |
//! |------|---------|
//! | `/readyz` | 200 only when the control store is healthy and unlocked and the node is not stopping |
//! | `/healthz` | 200 while the process is serving |
//! | `/metrics` | prometheus text format |

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use hearth_telemetry::encode_metrics;
use hk_02_control_store::ControlStore;
use parking_lot::Mutex;
use shared_types::{
    Component, ComponentError, ComponentErrorKind, ComponentId, ComponentInfo, ComponentStatus,
    ShutdownSignal, StoreHealth,
};
use tokio::task::JoinHandle;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ApiConfig;
use crate::dispatcher::CommandDispatcher;

#[derive(Clone)]
struct ApiState {
    store: ControlStore,
    dispatcher: Arc<CommandDispatcher>,
}

pub struct ReadinessServer {
    config: ApiConfig,
    state: ApiState,
    local_addr: Mutex<Option<SocketAddr>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessServer {
    pub fn new(config: ApiConfig, store: ControlStore, dispatcher: Arc<CommandDispatcher>) -> Self {
        Self {
            config,
            state: ApiState { store, dispatcher },
            local_addr: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Bound address once started. Differs from the configured one when
    /// binding port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.config)
    }
}

fn build_router(state: ApiState, config: &ApiConfig) -> Router {
    Router::new()
        .route("/readyz", get(readyz))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn readyz(State(state): State<ApiState>) -> impl IntoResponse {
    let health = state.store.health();
    let locked = state.store.is_locked();
    let shutting_down = state.dispatcher.is_shutting_down();
    let ready = health == StoreHealth::Healthy && !locked && !shutting_down;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "ready": ready,
        "store": health.to_string(),
        "locked": locked,
        "shutting_down": shutting_down,
        "revision": state.store.revision(),
        "detail": state.store.health_detail(),
    });
    (status, Json(body))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics() -> impl IntoResponse {
    match encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "[readiness] metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[async_trait]
impl Component for ReadinessServer {
    fn id(&self) -> ComponentId {
        ComponentId::Readiness
    }

    fn info(&self) -> ComponentInfo {
        ComponentInfo::new(ComponentId::Readiness)
            .depends_on(vec![ComponentId::StoreHealth])
            .described(format!("readiness endpoint on {}", self.config.bind_addr))
    }

    async fn start(&self, mut shutdown: ShutdownSignal) -> Result<(), ComponentError> {
        if self.task.lock().is_some() {
            return Err(ComponentError::new(
                ComponentId::Readiness,
                ComponentErrorKind::InitializationFailed,
                "already started",
            ));
        }

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| {
                ComponentError::new(
                    ComponentId::Readiness,
                    ComponentErrorKind::InitializationFailed,
                    format!("bind {}: {e}", self.config.bind_addr),
                )
            })?;
        let addr = listener.local_addr().map_err(|e| {
            ComponentError::new(
                ComponentId::Readiness,
                ComponentErrorKind::InitializationFailed,
                e.to_string(),
            )
        })?;
        *self.local_addr.lock() = Some(addr);

        let router = self.router();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "[readiness] server exited");
            }
            debug!("[readiness] stopped");
        });
        *self.task.lock() = Some(handle);
        info!(%addr, "[readiness] ✓ readiness server started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ComponentError> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        *self.local_addr.lock() = None;
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
            "component": ComponentId::Readiness.name(),
            "addr": self.local_addr().map(|a| a.to_string()),
        })
    }
}
