//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging, metrics and optional span export.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name in logs and traces
    pub service_name: String,

    /// Device identifier, attached to every span
    pub device_id: String,

    /// Log level filter (trace, debug, info, warn, error or a full directive)
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// JSON formatted logs (for journald / log shippers)
    pub json_logs: bool,

    /// OTLP endpoint, used only with the `otlp` feature
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "hearth".to_string(),
            device_id: "local".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            otlp_endpoint: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// - `HEARTH_SERVICE_NAME`: Service name (default: hearth)
    /// - `HEARTH_DEVICE_ID`: Device identifier (default: local)
    /// - `HEARTH_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `HEARTH_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `HEARTH_JSON_LOGS`: JSON logs (default: true under systemd)
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector (default: unset)
    pub fn from_env() -> Self {
        let under_systemd = env::var("INVOCATION_ID").is_ok() || env::var("JOURNAL_STREAM").is_ok();

        Self {
            service_name: env::var("HEARTH_SERVICE_NAME").unwrap_or_else(|_| "hearth".to_string()),

            device_id: env::var("HEARTH_DEVICE_ID").unwrap_or_else(|_| "local".to_string()),

            log_level: env::var("HEARTH_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("HEARTH_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("HEARTH_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(under_systemd),

            otlp_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        }
    }

    /// Service name qualified with the device id.
    pub fn full_service_name(&self) -> String {
        if self.device_id == "local" {
            self.service_name.clone()
        } else {
            format!("{}-{}", self.service_name, self.device_id)
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
