//! Domain types for the volume manager.

mod error;

pub use error::{VolumeError, VolumeResult};

use serde::{Deserialize, Serialize};
use shared_types::{ClusterMode, DiskStatus, MountMode, Role, VolumeClass, VolumeSpec};
use std::path::PathBuf;
use std::time::Duration;

/// Mount mode a member may use for a volume, given the owner's policy and
/// this member's role.
///
/// | class       | mode      | Leader | FollowerWarm | FollowerCold |
/// |-------------|-----------|--------|--------------|--------------|
/// | Bootstrap   | any       | rw     | rw           | rw           |
/// | Control     | stateful  | rw     | ro           | ro           |
/// | Application | stateful  | rw     | ro           | denied       |
/// | any other   | stateless | ro     | ro           | ro           |
#[must_use]
pub fn allowed_mode(class: VolumeClass, cluster_mode: ClusterMode, role: Role) -> MountMode {
    match (class, cluster_mode, role) {
        (VolumeClass::Bootstrap, _, _) => MountMode::ReadWrite,
        (_, ClusterMode::StatelessReadOnly, _) => MountMode::ReadOnly,
        (_, ClusterMode::Stateful, Role::Leader) => MountMode::ReadWrite,
        (_, ClusterMode::Stateful, Role::FollowerWarm) => MountMode::ReadOnly,
        (VolumeClass::Control, ClusterMode::Stateful, Role::FollowerCold) => MountMode::ReadOnly,
        (VolumeClass::Application, ClusterMode::Stateful, Role::FollowerCold) => MountMode::Denied,
    }
}

/// Tracked state of one catalogued volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeState {
    pub spec: VolumeSpec,
    /// Mode last requested by a caller; kept across role-driven detaches so
    /// a later promotion restores the mount.
    pub desired: Option<MountMode>,
    /// Mode currently mounted, if any.
    pub attached: Option<MountMode>,
    pub path: Option<PathBuf>,
    /// Persisted in the control store catalog.
    pub persisted: bool,
}

impl VolumeState {
    #[must_use]
    pub fn new(spec: VolumeSpec, persisted: bool) -> Self {
        Self {
            spec,
            desired: None,
            attached: None,
            path: None,
            persisted,
        }
    }
}

/// Result of `create_volume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Identical spec already catalogued.
    Exists,
}

/// A mounted volume as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mode: MountMode,
    pub path: PathBuf,
}

/// Volume manager configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Root under which volumes are materialised and whose free space is
    /// monitored.
    pub data_root: PathBuf,
    /// Free-space fraction below which the disk is `Low`.
    pub low_space_ratio: f64,
    /// Free-space fraction below which the disk is `Critical`.
    pub critical_space_ratio: f64,
    #[serde(with = "duration_secs")]
    pub disk_poll_interval: Duration,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/hearth/volumes"),
            low_space_ratio: 0.10,
            critical_space_ratio: 0.05,
            disk_poll_interval: Duration::from_secs(30),
        }
    }
}

impl VolumeConfig {
    /// Classify free space against the configured thresholds.
    #[must_use]
    pub fn classify(&self, available: u64, total: u64) -> DiskStatus {
        if total == 0 {
            return DiskStatus::Unavailable;
        }
        let ratio = available as f64 / total as f64;
        if ratio < self.critical_space_ratio {
            DiskStatus::Critical
        } else if ratio < self.low_space_ratio {
            DiskStatus::Low
        } else {
            DiskStatus::Ok
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
