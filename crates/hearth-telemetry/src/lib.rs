//! # Hearth Telemetry
//!
//! Logging and metrics for the hearth node.
//!
//! - **Logs**: `tracing` with an env filter, pretty or JSON output
//! - **Metrics**: Prometheus registry served by the node's `/metrics`
//! - **Traces**: optional OTLP export behind the `otlp` feature
//!
//! ```rust,ignore
//! use hearth_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HEARTH_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `HEARTH_JSON_LOGS` | `true` under systemd | JSON output |
//! | `HEARTH_DEVICE_ID` | `local` | Device identifier |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | unset | OTLP collector (`otlp` feature) |

mod config;
mod logging;
pub mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, register_metrics};
pub use tracing_setup::TracingGuard;

#[doc(hidden)]
pub use tracing;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing: {0}")]
    TracerInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Guard that keeps telemetry active. Drop to flush exporters.
pub struct TelemetryGuard {
    _tracing: TracingGuard,
}

/// Register metrics and install the global subscriber.
///
/// Hold the returned guard for the lifetime of the process.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    register_metrics()?;
    let tracing_guard = tracing_setup::init_tracing(&config)?;
    Ok(TelemetryGuard {
        _tracing: tracing_guard,
    })
}
