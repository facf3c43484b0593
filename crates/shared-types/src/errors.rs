//! # Error Types
//!
//! The kernel error taxonomy. Every module converts its local error enum into
//! [`KernelError`] at its public boundary; command results carry only the
//! serializable [`ErrorKind`] plus a message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::entities::{MountMode, ResourceKey};

/// Errors surfaced by kernel operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Write attempted without ownership. Retry after a role change.
    #[error("not leader for {resource}")]
    NotLeader { resource: ResourceKey },

    /// Control store failed its integrity check.
    #[error("control store unhealthy: {detail}")]
    StoreUnhealthy { detail: String },

    /// No local or peer target for a connection.
    #[error("no route: {target}")]
    NoRoute { target: String },

    /// Attach requested in a mode the current role disallows.
    #[error("volume {volume} denied: requested {requested}, allowed {allowed}")]
    VolumeDenied {
        volume: String,
        requested: MountMode,
        allowed: MountMode,
    },

    /// Relay rejected the bearer token.
    #[error("relay unauthenticated: {reason}")]
    RelayUnauthenticated { reason: String },

    /// Control store is sealed, or the credential was rejected.
    #[error("locked: {detail}")]
    Locked { detail: String },

    /// Store is in import mode.
    #[error("read-only: {detail}")]
    ReadOnly { detail: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    /// Same name, different definition.
    #[error("conflict: {detail}")]
    Conflict { detail: String },

    #[error("invalid command: {detail}")]
    InvalidCommand { detail: String },

    #[error("shutting down")]
    ShuttingDown,

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Serializable discriminant.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotLeader { .. } => ErrorKind::NotLeader,
            Self::StoreUnhealthy { .. } => ErrorKind::StoreUnhealthy,
            Self::NoRoute { .. } => ErrorKind::NoRoute,
            Self::VolumeDenied { .. } => ErrorKind::VolumeDenied,
            Self::RelayUnauthenticated { .. } => ErrorKind::RelayUnauthenticated,
            Self::Locked { .. } => ErrorKind::Locked,
            Self::ReadOnly { .. } => ErrorKind::ReadOnly,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidCommand { .. } => ErrorKind::InvalidCommand,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
            Self::Io(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry after observing a state change.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::NoRoute { .. } | Self::RelayUnauthenticated { .. }
        )
    }

    pub fn not_leader(resource: &ResourceKey) -> Self {
        Self::NotLeader {
            resource: resource.clone(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidCommand {
            detail: detail.into(),
        }
    }
}

impl From<std::io::Error> for KernelError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Discriminant of [`KernelError`] returned to command callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotLeader,
    StoreUnhealthy,
    NoRoute,
    VolumeDenied,
    RelayUnauthenticated,
    Locked,
    ReadOnly,
    NotFound,
    Conflict,
    InvalidCommand,
    ShuttingDown,
    Io,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
