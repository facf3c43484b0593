//! # Core Entities
//!
//! Ownership units, roles and the volume vocabulary used by every module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::KernelError;

/// Prefix for application resource keys (`app:<name>`).
pub const APP_PREFIX: &str = "app:";

/// Key of the control-plane resource.
pub const KERNEL_KEY: &str = "kernel";

/// An ownership unit subject to leader election.
///
/// Serialized as its string form (`kernel`, `app:<name>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceKey {
    /// The control plane itself.
    Kernel,
    /// A named application.
    App(String),
}

impl ResourceKey {
    /// Build an application key, validating the name.
    pub fn app(name: impl Into<String>) -> Result<Self, KernelError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self::App(name))
    }

    /// Parse `kernel` or `app:<name>`.
    pub fn parse(raw: &str) -> Result<Self, KernelError> {
        if raw == KERNEL_KEY {
            return Ok(Self::Kernel);
        }
        match raw.strip_prefix(APP_PREFIX) {
            Some(name) => Self::app(name),
            None => Err(KernelError::InvalidCommand {
                detail: format!("unknown resource key '{raw}'"),
            }),
        }
    }

    #[must_use]
    pub fn is_kernel(&self) -> bool {
        matches!(self, Self::Kernel)
    }

    /// Application name, if any.
    #[must_use]
    pub fn app_name(&self) -> Option<&str> {
        match self {
            Self::Kernel => None,
            Self::App(name) => Some(name),
        }
    }
}

/// Names are restricted to a filesystem- and DNS-safe alphabet.
pub fn validate_name(name: &str) -> Result<(), KernelError> {
    let ok = !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        && !name.starts_with('-');
    if ok {
        Ok(())
    } else {
        Err(KernelError::InvalidCommand {
            detail: format!("invalid name '{name}'"),
        })
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => write!(f, "{KERNEL_KEY}"),
            Self::App(name) => write!(f, "{APP_PREFIX}{name}"),
        }
    }
}

impl FromStr for ResourceKey {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.to_string()
    }
}

/// Role of this member for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Single active writer.
    Leader,
    /// Read-only replica, may serve stale reads.
    FollowerWarm,
    /// No writable mounts, no workloads.
    FollowerCold,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Leader, Role::FollowerWarm, Role::FollowerCold];

    #[must_use]
    pub fn is_leader(self) -> bool {
        matches!(self, Self::Leader)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leader => write!(f, "leader"),
            Self::FollowerWarm => write!(f, "follower_warm"),
            Self::FollowerCold => write!(f, "follower_cold"),
        }
    }
}

/// Per-resource replication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Single active writer, followers cold unless warmed.
    #[default]
    Stateful,
    /// Every member is a read replica, role pinned to `FollowerWarm`.
    StatelessReadOnly,
}

impl ClusterMode {
    pub const ALL: [ClusterMode; 2] = [ClusterMode::Stateful, ClusterMode::StatelessReadOnly];
}

/// Replication and mount policy class of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeClass {
    /// Device-local, never replicated, rebuilt after unlock.
    Bootstrap,
    /// Replicated control-plane state, owned by `kernel`.
    Control,
    /// Per-application data.
    Application,
}

impl VolumeClass {
    pub const ALL: [VolumeClass; 3] = [
        VolumeClass::Bootstrap,
        VolumeClass::Control,
        VolumeClass::Application,
    ];
}

impl fmt::Display for VolumeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Control => write!(f, "control"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// How a volume is (or may be) attached.
///
/// Ordered by permissiveness: `Denied < ReadOnly < ReadWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MountMode {
    Denied,
    ReadOnly,
    ReadWrite,
}

impl MountMode {
    /// Whether a request for `requested` fits within `self`.
    #[must_use]
    pub fn permits(self, requested: MountMode) -> bool {
        self != MountMode::Denied && requested <= self
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => write!(f, "denied"),
            Self::ReadOnly => write!(f, "ro"),
            Self::ReadWrite => write!(f, "rw"),
        }
    }
}

/// Creation options of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOptions {
    /// Owning application for `Application` volumes.
    #[serde(default)]
    pub app: Option<String>,
    /// Soft quota in MiB (0 = unlimited).
    #[serde(default)]
    pub size_mb: u64,
    /// Desired replica count; informational for the mount layer.
    #[serde(default = "default_replication")]
    pub replication_factor: u8,
}

fn default_replication() -> u8 {
    1
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            app: None,
            size_mb: 0,
            replication_factor: default_replication(),
        }
    }
}

impl VolumeOptions {
    /// Options for a volume owned by `app`.
    #[must_use]
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            ..Self::default()
        }
    }
}

/// A named volume with its class and creation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,
    pub class: VolumeClass,
    #[serde(default)]
    pub options: VolumeOptions,
}

impl VolumeSpec {
    pub fn new(name: impl Into<String>, class: VolumeClass, options: VolumeOptions) -> Self {
        Self {
            name: name.into(),
            class,
            options,
        }
    }

    /// Resource whose role governs this volume's mounts.
    ///
    /// Bootstrap and control volumes belong to the kernel.
    pub fn owner(&self) -> Result<ResourceKey, KernelError> {
        match (self.class, &self.options.app) {
            (VolumeClass::Application, Some(app)) => ResourceKey::app(app.clone()),
            (VolumeClass::Application, None) => Err(KernelError::invalid(format!(
                "application volume {} has no owning app",
                self.name
            ))),
            _ => Ok(ResourceKey::Kernel),
        }
    }
}

/// Export bundle kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    /// Store snapshot plus device registry, used to reinstate a node.
    ControlOnly,
    /// Control-only plus every application volume.
    FullData,
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlOnly => write!(f, "control_only"),
            Self::FullData => write!(f, "full_data"),
        }
    }
}

/// Integrity status of the control store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreHealth {
    Healthy,
    Degraded,
}

impl fmt::Display for StoreHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Free-space status of a monitored disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStatus {
    Ok,
    Low,
    Critical,
    Unavailable,
}

/// Whether a relay-advertised endpoint is TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Plain,
    Tls,
}

impl TransportMode {
    #[must_use]
    pub fn from_tls(is_tls: bool) -> Self {
        if is_tls {
            Self::Tls
        } else {
            Self::Plain
        }
    }

    #[must_use]
    pub fn is_tls(self) -> bool {
        matches!(self, Self::Tls)
    }
}
