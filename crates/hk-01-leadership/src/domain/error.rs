//! Error types for the leadership registry.

use shared_types::{ClusterMode, KernelError, ResourceKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeadershipError {
    #[error("resource {0} is not registered")]
    Unregistered(ResourceKey),

    #[error("resource {resource} already registered as {existing:?}")]
    ModeConflict {
        resource: ResourceKey,
        existing: ClusterMode,
    },

    #[error("resource {0} is pinned to follower_warm")]
    Pinned(ResourceKey),

    /// The lease arbiter cannot be reached (quorum loss).
    #[error("lease arbiter unavailable: {0}")]
    ArbiterUnavailable(String),

    #[error("consensus provider not started")]
    NotStarted,

    #[error("consensus provider error: {0}")]
    Provider(String),
}

pub type LeadershipResult<T> = Result<T, LeadershipError>;

impl From<LeadershipError> for KernelError {
    fn from(err: LeadershipError) -> Self {
        match err {
            LeadershipError::Unregistered(resource) => {
                KernelError::not_found(format!("resource {resource}"))
            }
            LeadershipError::ModeConflict { .. } | LeadershipError::Pinned(_) => {
                KernelError::Conflict {
                    detail: err.to_string(),
                }
            }
            LeadershipError::ArbiterUnavailable(_)
            | LeadershipError::NotStarted
            | LeadershipError::Provider(_) => KernelError::Internal(err.to_string()),
        }
    }
}
