//! Seams between the router, the relay adapter and the network.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::{ResolvedTarget, TokenError};

/// Byte stream the router can pipe.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream>;

/// Looks up the local target for a relay-advertised endpoint.
///
/// Implemented by the relay adapter's route table and consumed by the
/// router, so neither holds the other.
pub trait RemoteResolver: Send + Sync {
    fn resolve(&self, hostname: &str, port: u16, is_tls: bool) -> Option<ResolvedTarget>;
}

/// Opens outbound byte streams (local services, relay data connections).
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> std::io::Result<BoxedStream>;
}

/// Issues bearer tokens for the relay handshake.
///
/// Called once per connection attempt; every call returns a fresh token.
pub trait TokenProvider: Send + Sync {
    fn issue(&self, hostnames: &[String]) -> Result<String, TokenError>;
}
