//! Error types for the control store.

use shared_crypto::CryptoError;
use shared_types::{KernelError, ResourceKey};

/// Failure of the underlying key-value backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KVStoreError {
    #[error("kv I/O error: {message}")]
    IOError { message: String },

    #[error("kv backend closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// This member does not lead the store's owner, or lost leadership
    /// since the transaction began.
    #[error("not leader for {resource}: {detail}")]
    NotLeader { resource: ResourceKey, detail: String },

    #[error("control store degraded: {0}")]
    Unhealthy(String),

    #[error("control store locked")]
    Locked,

    #[error("bad credential")]
    BadCredential,

    #[error("control store is read-only until the pending import completes")]
    ReadOnly,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record {key} could not be decoded: {detail}")]
    Corrupted { key: String, detail: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Kv(#[from] KVStoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for KernelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotLeader { resource, .. } => KernelError::not_leader(&resource),
            StoreError::Unhealthy(detail) => KernelError::StoreUnhealthy { detail },
            StoreError::Locked => KernelError::Locked {
                detail: "control store locked".to_string(),
            },
            StoreError::BadCredential => KernelError::Locked {
                detail: "bad credential".to_string(),
            },
            StoreError::ReadOnly => KernelError::ReadOnly {
                detail: err.to_string(),
            },
            StoreError::NotFound(what) => KernelError::NotFound { what },
            StoreError::Conflict(detail) => KernelError::Conflict { detail },
            StoreError::Corrupted { .. } => KernelError::StoreUnhealthy {
                detail: err.to_string(),
            },
            StoreError::Kv(_) => KernelError::Io(err.to_string()),
            StoreError::Serialization(_) | StoreError::Crypto(_) => {
                KernelError::Internal(err.to_string())
            }
        }
    }
}
