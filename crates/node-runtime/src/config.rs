//! # Node Configuration
//!
//! Unified configuration for every kernel component and the daemon itself.
//!
//! Values come from `HEARTH_*` environment variables layered over
//! [`Default`]s. Paths for volumes and exports follow `HEARTH_DATA_DIR`
//! unless overridden individually.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `HEARTH_DATA_DIR` | `store.data_dir` (and derived paths) |
//! | `HEARTH_STORE_BACKEND` | `store.backend` (`memory` or `rocksdb`) |
//! | `HEARTH_KDF_ROUNDS` | `store.kdf_rounds` |
//! | `HEARTH_HEALTH_INTERVAL_SECS` | `store.health_interval` |
//! | `HEARTH_AUTO_REPAIR` | `store.auto_repair` |
//! | `HEARTH_DEVICE_ID` | `cluster.member_id`, `relay.device_id` |
//! | `HEARTH_ADVERTISE_ADDR` | `cluster.advertise_addr` |
//! | `HEARTH_CONSENSUS` | `cluster.provider` (`single` or `lease`) |
//! | `HEARTH_LEASE_TTL_SECS` / `HEARTH_LEASE_RENEW_SECS` | lease timing |
//! | `HEARTH_RELAY_ADDR` | `relay.relay_addr` (unset disables the relay) |
//! | `HEARTH_RELAY_TOKEN_TTL_SECS` | `relay.token_ttl` |
//! | `HEARTH_VOLUME_ROOT` | `volume.data_root` |
//! | `HEARTH_DISK_POLL_SECS` | `volume.disk_poll_interval` |
//! | `HEARTH_EXPORT_DIR` | `export.export_dir` |
//! | `HEARTH_API_ADDR` | `api.bind_addr` |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use hk_01_leadership::LeaseConfig;
use hk_02_control_store::ControlStoreConfig;
use hk_03_volume_manager::VolumeConfig;
use hk_04_export_manager::ExportConfig;
use hk_05_router::{RelayConfig, RouterConfig};
use shared_types::KernelError;
use thiserror::Error;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub store: StoreConfig,
    pub cluster: ClusterConfig,
    pub relay: RelayConfig,
    pub router: RouterConfig,
    pub volume: VolumeConfig,
    pub export: ExportConfig,
    pub api: ApiConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        let cluster = ClusterConfig::default();
        Self {
            volume: VolumeConfig {
                data_root: store.data_dir.join("volumes"),
                ..VolumeConfig::default()
            },
            export: ExportConfig {
                export_dir: store.data_dir.join("exports"),
            },
            relay: RelayConfig {
                device_id: cluster.member_id.clone(),
                ..RelayConfig::default()
            },
            router: RouterConfig::default(),
            api: ApiConfig::default(),
            store,
            cluster,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}={value}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Inconsistent(String),

    #[error("storage backend '{0}' is not compiled in (enable the feature)")]
    BackendUnavailable(&'static str),
}

impl From<ConfigError> for KernelError {
    fn from(err: ConfigError) -> Self {
        KernelError::invalid(err.to_string())
    }
}

// =============================================================================
// SUB-CONFIGS
// =============================================================================

/// Control store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    RocksDb,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(Self::Memory),
            "rocksdb" | "rocks" => Ok(Self::RocksDb),
            other => Err(format!("unknown backend '{other}'")),
        }
    }
}

/// Control store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of all persistent node state.
    pub data_dir: PathBuf,
    pub backend: StoreBackend,
    /// Journal entries between checkpoints.
    pub checkpoint_every: u64,
    pub kdf_rounds: u32,
    pub health_interval: Duration,
    pub auto_repair: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let store = ControlStoreConfig::default();
        Self {
            data_dir: PathBuf::from("/var/lib/hearth"),
            backend: if cfg!(feature = "rocksdb") {
                StoreBackend::RocksDb
            } else {
                StoreBackend::Memory
            },
            checkpoint_every: store.checkpoint_every,
            kdf_rounds: store.kdf_rounds,
            health_interval: store.health_interval,
            auto_repair: store.auto_repair,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn control_store_config(&self) -> ControlStoreConfig {
        ControlStoreConfig {
            checkpoint_every: self.checkpoint_every,
            kdf_rounds: self.kdf_rounds,
            health_interval: self.health_interval,
            auto_repair: self.auto_repair,
        }
    }

    /// Location of the RocksDB control database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("control")
    }

    /// Device identity key (hex seed). Device-local, never exported.
    #[must_use]
    pub fn device_key_path(&self) -> PathBuf {
        self.data_dir.join("device.key")
    }
}

/// Which consensus provider backs the leadership registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    SingleNode,
    Lease,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "single" | "single-node" | "single_node" => Ok(Self::SingleNode),
            "lease" => Ok(Self::Lease),
            other => Err(format!("unknown consensus provider '{other}'")),
        }
    }
}

/// Cluster membership configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// This member's device id.
    pub member_id: String,
    /// Address peers use to reach this member.
    pub advertise_addr: String,
    pub provider: ProviderKind,
    pub lease_ttl: Duration,
    pub lease_renew_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let lease = LeaseConfig::default();
        Self {
            member_id: "local".to_string(),
            advertise_addr: "127.0.0.1:9470".to_string(),
            provider: ProviderKind::SingleNode,
            lease_ttl: lease.ttl,
            lease_renew_interval: lease.renew_interval,
        }
    }
}

impl ClusterConfig {
    #[must_use]
    pub fn lease_config(&self) -> LeaseConfig {
        LeaseConfig {
            ttl: self.lease_ttl,
            renew_interval: self.lease_renew_interval,
        }
    }
}

/// Readiness / metrics HTTP surface.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9480)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

// =============================================================================
// LOADING
// =============================================================================

impl NodeConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup("HEARTH_DATA_DIR") {
            let dir = PathBuf::from(dir);
            config.volume.data_root = dir.join("volumes");
            config.export.export_dir = dir.join("exports");
            config.store.data_dir = dir;
        }
        if let Some(backend) = parse(&lookup, "HEARTH_STORE_BACKEND")? {
            config.store.backend = backend;
        }
        if let Some(rounds) = parse(&lookup, "HEARTH_KDF_ROUNDS")? {
            config.store.kdf_rounds = rounds;
        }
        if let Some(secs) = parse(&lookup, "HEARTH_HEALTH_INTERVAL_SECS")? {
            config.store.health_interval = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("HEARTH_AUTO_REPAIR") {
            config.store.auto_repair = parse_flag("HEARTH_AUTO_REPAIR", &raw)?;
        }

        if let Some(id) = lookup("HEARTH_DEVICE_ID") {
            config.relay.device_id = id.clone();
            config.cluster.member_id = id;
        }
        if let Some(addr) = lookup("HEARTH_ADVERTISE_ADDR") {
            config.cluster.advertise_addr = addr;
        }
        if let Some(provider) = parse(&lookup, "HEARTH_CONSENSUS")? {
            config.cluster.provider = provider;
        }
        if let Some(secs) = parse(&lookup, "HEARTH_LEASE_TTL_SECS")? {
            config.cluster.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, "HEARTH_LEASE_RENEW_SECS")? {
            config.cluster.lease_renew_interval = Duration::from_secs(secs);
        }

        if let Some(addr) = lookup("HEARTH_RELAY_ADDR") {
            config.relay.relay_addr = (!addr.trim().is_empty()).then(|| addr.trim().to_string());
        }
        if let Some(secs) = parse(&lookup, "HEARTH_RELAY_TOKEN_TTL_SECS")? {
            config.relay.token_ttl = Duration::from_secs(secs);
        }

        if let Some(root) = lookup("HEARTH_VOLUME_ROOT") {
            config.volume.data_root = PathBuf::from(root);
        }
        if let Some(secs) = parse(&lookup, "HEARTH_DISK_POLL_SECS")? {
            config.volume.disk_poll_interval = Duration::from_secs(secs);
        }
        if let Some(dir) = lookup("HEARTH_EXPORT_DIR") {
            config.export.export_dir = PathBuf::from(dir);
        }
        if let Some(addr) = parse(&lookup, "HEARTH_API_ADDR")? {
            config.api.bind_addr = addr;
        }

        Ok(config)
    }

    /// Cross-field checks. Run before building the kernel graph.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.member_id.trim().is_empty()
            || self.cluster.member_id.chars().any(char::is_whitespace)
        {
            return Err(ConfigError::Inconsistent(format!(
                "member id '{}' must be non-empty without whitespace",
                self.cluster.member_id
            )));
        }
        if self.relay.device_id != self.cluster.member_id {
            return Err(ConfigError::Inconsistent(format!(
                "relay device id '{}' differs from member id '{}'",
                self.relay.device_id, self.cluster.member_id
            )));
        }

        if self.store.kdf_rounds == 0 {
            return Err(ConfigError::Inconsistent("kdf_rounds must be at least 1".into()));
        }
        if self.store.health_interval.is_zero() {
            return Err(ConfigError::Inconsistent("health interval must be non-zero".into()));
        }
        if self.store.backend == StoreBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::BackendUnavailable("rocksdb"));
        }

        if self.cluster.provider == ProviderKind::Lease
            && self.cluster.lease_renew_interval.saturating_mul(2) > self.cluster.lease_ttl
        {
            return Err(ConfigError::Inconsistent(format!(
                "lease renew interval {:?} must be at most half the ttl {:?}",
                self.cluster.lease_renew_interval, self.cluster.lease_ttl
            )));
        }

        if self.relay.token_ttl.is_zero() {
            return Err(ConfigError::Inconsistent("relay token ttl must be non-zero".into()));
        }
        if self.relay.backoff_base.is_zero() || self.relay.backoff_base > self.relay.backoff_max {
            return Err(ConfigError::Inconsistent(format!(
                "relay backoff base {:?} must be non-zero and at most the max {:?}",
                self.relay.backoff_base, self.relay.backoff_max
            )));
        }

        let (low, critical) = (self.volume.low_space_ratio, self.volume.critical_space_ratio);
        if !(0.0 < critical && critical <= low && low < 1.0) {
            return Err(ConfigError::Inconsistent(format!(
                "disk thresholds must satisfy 0 < critical ({critical}) <= low ({low}) < 1"
            )));
        }

        Ok(())
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(var)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_default_config_validates() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_data_dir_moves_derived_paths() {
        let config = NodeConfig::from_lookup(lookup(&[("HEARTH_DATA_DIR", "/srv/hearth")])).unwrap();
        assert_eq!(config.store.data_dir, PathBuf::from("/srv/hearth"));
        assert_eq!(config.volume.data_root, PathBuf::from("/srv/hearth/volumes"));
        assert_eq!(config.export.export_dir, PathBuf::from("/srv/hearth/exports"));
        assert_eq!(config.store.device_key_path(), PathBuf::from("/srv/hearth/device.key"));
    }

    #[test]
    fn test_explicit_paths_win() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("HEARTH_EXPORT_DIR", "/mnt/usb"),
            ("HEARTH_DATA_DIR", "/srv/hearth"),
        ]))
        .unwrap();
        assert_eq!(config.export.export_dir, PathBuf::from("/mnt/usb"));
    }

    #[test]
    fn test_device_id_feeds_relay() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("HEARTH_DEVICE_ID", "node-7"),
            ("HEARTH_RELAY_ADDR", "relay.example.net:7000"),
        ]))
        .unwrap();
        assert_eq!(config.cluster.member_id, "node-7");
        assert_eq!(config.relay.device_id, "node-7");
        assert_eq!(config.relay.relay_addr.as_deref(), Some("relay.example.net:7000"));
        config.validate().unwrap();
    }

    #[test]
    fn test_blank_relay_addr_disables() {
        let config = NodeConfig::from_lookup(lookup(&[("HEARTH_RELAY_ADDR", "  ")])).unwrap();
        assert!(config.relay.relay_addr.is_none());
    }

    #[test]
    fn test_bad_number_is_reported() {
        let err = NodeConfig::from_lookup(lookup(&[("HEARTH_KDF_ROUNDS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: "HEARTH_KDF_ROUNDS", .. }));
    }

    #[test]
    fn test_bad_flag_is_reported() {
        let err = NodeConfig::from_lookup(lookup(&[("HEARTH_AUTO_REPAIR", "perhaps")])).unwrap_err();
        assert!(err.to_string().contains("HEARTH_AUTO_REPAIR"));
    }

    #[test]
    fn test_lease_timing_checked() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("HEARTH_CONSENSUS", "lease"),
            ("HEARTH_LEASE_TTL_SECS", "4"),
            ("HEARTH_LEASE_RENEW_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.cluster.provider, ProviderKind::Lease);
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));
    }

    #[test]
    fn test_disk_thresholds_checked() {
        let mut config = NodeConfig::default();
        config.volume.critical_space_ratio = 0.2;
        config.volume.low_space_ratio = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_error_maps_to_invalid_command() {
        let err: KernelError = ConfigError::Inconsistent("x".into()).into();
        assert_eq!(err.kind(), shared_types::ErrorKind::InvalidCommand);
    }

    #[cfg(not(feature = "rocksdb"))]
    #[test]
    fn test_rocksdb_requires_feature() {
        let config = NodeConfig::from_lookup(lookup(&[("HEARTH_STORE_BACKEND", "rocksdb")])).unwrap();
        assert_eq!(config.validate(), Err(ConfigError::BackendUnavailable("rocksdb")));
    }
}
