//! Error types for the export manager.

use hk_02_control_store::StoreError;
use hk_03_volume_manager::VolumeError;
use shared_types::KernelError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    /// Exports are refused while the control store is degraded.
    #[error("control store unhealthy: {0}")]
    StoreUnhealthy(String),

    /// Bundle failed verification (version, digest or layout).
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    #[error("export I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Volume(#[from] VolumeError),
}

pub type ExportResult<T> = Result<T, ExportError>;

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for ExportError {
    fn from(err: bincode::Error) -> Self {
        ExportError::Serialization(err.to_string())
    }
}

impl From<ExportError> for KernelError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::StoreUnhealthy(detail) => KernelError::StoreUnhealthy { detail },
            ExportError::InvalidBundle(detail) => KernelError::InvalidCommand { detail },
            ExportError::Io(detail) => KernelError::Io(detail),
            ExportError::Serialization(detail) => KernelError::Internal(detail),
            ExportError::Store(store) => store.into(),
            ExportError::Volume(volume) => volume.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[test]
    fn test_unhealthy_maps_to_store_unhealthy() {
        let err: KernelError = ExportError::StoreUnhealthy("checksum mismatch".into()).into();
        assert_eq!(err.kind(), ErrorKind::StoreUnhealthy);

        let err: KernelError = ExportError::Store(StoreError::Unhealthy("x".into())).into();
        assert_eq!(err.kind(), ErrorKind::StoreUnhealthy);
    }
}
