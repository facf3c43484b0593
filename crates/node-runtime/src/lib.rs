//! # Hearth Node Runtime
//!
//! Assembles the kernel modules into one supervised process.
//!
//! ## Modules
//!
//! - [`config`] - `HEARTH_*` environment configuration and validation
//! - [`wiring`] - builds the [`KernelGraph`] from a [`NodeConfig`]
//! - [`supervisor`] - dependency-ordered component lifecycle
//! - [`dispatcher`] - command preconditions and routing to hk-01..hk-05
//! - [`observer`] - bus events to prometheus
//! - [`server`] - `/readyz`, `/healthz`, `/metrics`
//!
//! ## Startup Sequence
//!
//! 1. Load and validate configuration
//! 2. Build the kernel graph (nothing runs yet)
//! 3. Register the kernel resource, start components in dependency order
//! 4. Wait for an `Unlock` command before serving stateful work

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod dispatcher;
pub mod observer;
pub mod server;
pub mod supervisor;
pub mod wiring;

pub use config::{ConfigError, NodeConfig};
pub use dispatcher::{CommandDispatcher, Preconditions};
pub use observer::MetricsObserver;
pub use server::ReadinessServer;
pub use supervisor::{Supervisor, SupervisorError};
pub use wiring::{GraphParts, KernelGraph, WiringError};
