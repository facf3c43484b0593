//! Prometheus metrics for the hearth kernel.
//!
//! All metrics follow the naming convention: `hearth_<area>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts,
    HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT BUS
    // =========================================================================

    /// Events observed on the bus, by topic
    pub static ref EVENTS_OBSERVED: CounterVec = CounterVec::new(
        Opts::new("hearth_bus_events_total", "Events observed on the kernel bus"),
        &["topic"]
    ).expect("metric creation failed");

    // =========================================================================
    // COMMANDS
    // =========================================================================

    /// Commands dispatched, by command and outcome (ok or error kind)
    pub static ref COMMANDS_DISPATCHED: CounterVec = CounterVec::new(
        Opts::new("hearth_commands_total", "Commands dispatched"),
        &["command", "outcome"]
    ).expect("metric creation failed");

    /// Command handling latency
    pub static ref COMMAND_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("hearth_command_duration_seconds", "Time spent handling a command")
            .buckets(exponential_buckets(0.0005, 2.0, 14).expect("valid buckets")),
        &["command"]
    ).expect("metric creation failed");

    // =========================================================================
    // LEADERSHIP
    // =========================================================================

    /// Role transitions, by resource and new role
    pub static ref ROLE_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("hearth_leadership_transitions_total", "Role transitions published"),
        &["resource", "role"]
    ).expect("metric creation failed");

    /// 1 when this member leads the resource
    pub static ref IS_LEADER: GaugeVec = GaugeVec::new(
        Opts::new("hearth_leadership_is_leader", "Whether this member leads the resource"),
        &["resource"]
    ).expect("metric creation failed");

    // =========================================================================
    // CONTROL STORE
    // =========================================================================

    /// Last committed revision
    pub static ref STORE_REVISION: Gauge = Gauge::new(
        "hearth_store_revision",
        "Last committed control store revision"
    ).expect("metric creation failed");

    /// 1 healthy, 0 degraded
    pub static ref STORE_HEALTHY: Gauge = Gauge::new(
        "hearth_store_healthy",
        "Control store integrity status"
    ).expect("metric creation failed");

    /// 1 locked, 0 unlocked
    pub static ref STORE_LOCKED: Gauge = Gauge::new(
        "hearth_store_locked",
        "Control store lock state"
    ).expect("metric creation failed");

    // =========================================================================
    // RELAY
    // =========================================================================

    /// Relay reconnect attempts, by reason
    pub static ref RELAY_RECONNECTS: CounterVec = CounterVec::new(
        Opts::new("hearth_relay_reconnects_total", "Relay reconnect attempts"),
        &["reason"]
    ).expect("metric creation failed");

    /// Inbound relay streams refused
    pub static ref RELAY_STREAMS_REFUSED: Counter = Counter::new(
        "hearth_relay_streams_refused_total",
        "Inbound relay streams refused"
    ).expect("metric creation failed");
}

static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() -> Result<(), TelemetryError> {
    REGISTERED
        .get_or_init(|| {
            let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
                Box::new(EVENTS_OBSERVED.clone()),
                Box::new(COMMANDS_DISPATCHED.clone()),
                Box::new(COMMAND_DURATION.clone()),
                Box::new(ROLE_TRANSITIONS.clone()),
                Box::new(IS_LEADER.clone()),
                Box::new(STORE_REVISION.clone()),
                Box::new(STORE_HEALTHY.clone()),
                Box::new(STORE_LOCKED.clone()),
                Box::new(RELAY_RECONNECTS.clone()),
                Box::new(RELAY_STREAMS_REFUSED.clone()),
            ];
            for metric in metrics {
                REGISTRY.register(metric).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
        .clone()
        .map_err(TelemetryError::MetricsInit)
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
