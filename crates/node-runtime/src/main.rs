//! # hearthd
//!
//! The hearth kernel daemon.
//!
//! ```text
//! env ──→ NodeConfig ──→ KernelGraph::build ──→ start ──→ (ctrl-c) ──→ shutdown
//! ```
//!
//! The control store comes up locked. Nothing stateful is served until an
//! `Unlock` command arrives through the dispatcher.

use anyhow::{Context, Result};
use hearth_telemetry::{init_telemetry, TelemetryConfig};
use node_runtime::{GraphParts, KernelGraph, NodeConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("failed to initialize telemetry")?;

    let config = NodeConfig::from_env().context("invalid configuration")?;
    config.validate().context("invalid configuration")?;

    let graph = KernelGraph::build(config, GraphParts::default())
        .context("failed to build kernel graph")?;
    graph.start().await.context("failed to start kernel")?;

    info!("===========================================");
    info!("  hearthd v{}", env!("CARGO_PKG_VERSION"));
    info!("  member:  {}", graph.config.cluster.member_id);
    info!("  data:    {}", graph.config.store.data_dir.display());
    if let Some(addr) = graph.readiness.local_addr() {
        info!("  api:     http://{addr}");
    }
    info!("===========================================");
    graph.supervisor.print_status();
    info!("control store is locked; waiting for unlock");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    if let Err(e) = graph.shutdown().await {
        error!(error = %e, "shutdown finished with errors");
        return Err(e.into());
    }
    Ok(())
}
