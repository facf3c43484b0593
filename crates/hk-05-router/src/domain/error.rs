//! Error types for routing, the relay wire protocol and device tokens.

use shared_types::KernelError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// No published route matches the inbound endpoint.
    #[error("no route for {0}")]
    NoRoute(String),

    /// The resource is led elsewhere; forwarding is not performed.
    #[error("{target} is served by peer {peer}")]
    Tunneled { target: String, peer: String },

    #[error("dial {addr} failed: {detail}")]
    Dial { addr: String, detail: String },

    /// Piping failed after both ends were connected.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    /// Endpoint already published for a different resource.
    #[error("{key} already routed to {owner}")]
    Conflict { key: String, owner: String },
}

pub type RouterResult<T> = Result<T, RouterError>;

impl From<RouterError> for KernelError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::NoRoute(target) => KernelError::NoRoute { target },
            RouterError::Tunneled { .. } => KernelError::NoRoute {
                target: err.to_string(),
            },
            RouterError::Dial { .. } | RouterError::Stream(_) => KernelError::Io(err.to_string()),
            RouterError::InvalidRoute(detail) => KernelError::InvalidCommand { detail },
            RouterError::Conflict { .. } => KernelError::Conflict {
                detail: err.to_string(),
            },
        }
    }
}

/// Relay framing failures.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unexpected frame: expected {expected}, got {got}")]
    Unexpected { expected: &'static str, got: String },

    #[error("connection closed")]
    Closed,

    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::Malformed(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("bad token signature")]
    BadSignature,

    #[error("token expired at {0}")]
    Expired(u64),

    #[error("token issued in the future ({0})")]
    NotYetValid(u64),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Outcome of one relay session, used to pick the reconnect delay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("relay unreachable: {0}")]
    Connect(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl From<RelayError> for KernelError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Unauthenticated(reason) => KernelError::RelayUnauthenticated { reason },
            RelayError::Token(e) => KernelError::RelayUnauthenticated {
                reason: e.to_string(),
            },
            RelayError::Connect(detail) => KernelError::Io(detail),
            RelayError::Wire(e) => KernelError::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[test]
    fn test_tunneled_reads_as_no_route() {
        let err: KernelError = RouterError::Tunneled {
            target: "blog.example.com:443".into(),
            peer: "10.0.0.2:7000".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NoRoute);
    }

    #[test]
    fn test_rejection_maps_to_unauthenticated() {
        let err: KernelError = RelayError::Unauthenticated("expired".into()).into();
        assert_eq!(err.kind(), ErrorKind::RelayUnauthenticated);
    }
}
