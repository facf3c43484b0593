//! Error types for the volume manager.

use hk_02_control_store::StoreError;
use shared_types::{KernelError, MountMode};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VolumeError {
    #[error("volume {0} not found")]
    NotFound(String),

    /// Same name, different class or options.
    #[error("volume {name} exists with a different definition")]
    Conflict { name: String },

    /// The current role does not allow the requested mode.
    #[error("volume {name} denied: requested {requested}, allowed {allowed}")]
    Denied {
        name: String,
        requested: MountMode,
        allowed: MountMode,
    },

    #[error("invalid volume: {0}")]
    Invalid(String),

    /// The mount backend failed or refused.
    #[error("mount of {name} failed: {detail}")]
    Mount { name: String, detail: String },

    /// Bootstrap volume has no key and none can be issued yet.
    #[error("no key for bootstrap volume {0}")]
    MissingKey(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type VolumeResult<T> = Result<T, VolumeError>;

impl From<KernelError> for VolumeError {
    fn from(err: KernelError) -> Self {
        VolumeError::Invalid(err.to_string())
    }
}

impl From<VolumeError> for KernelError {
    fn from(err: VolumeError) -> Self {
        match err {
            VolumeError::NotFound(name) => KernelError::not_found(format!("volume {name}")),
            VolumeError::Conflict { .. } => KernelError::Conflict {
                detail: err.to_string(),
            },
            VolumeError::Denied {
                name,
                requested,
                allowed,
            } => KernelError::VolumeDenied {
                volume: name,
                requested,
                allowed,
            },
            VolumeError::Invalid(detail) => KernelError::InvalidCommand { detail },
            VolumeError::Mount { .. } => KernelError::Io(err.to_string()),
            VolumeError::MissingKey(_) => KernelError::Locked {
                detail: err.to_string(),
            },
            VolumeError::Store(store) => store.into(),
        }
    }
}
