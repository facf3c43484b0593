//! Domain types for routing and the relay session.

mod error;

pub use error::{RelayError, RouterError, RouterResult, TokenError, WireError};

use serde::{Deserialize, Serialize};
use shared_types::{ResourceKey, RouteSpec, TransportMode};
use std::fmt;
use std::time::Duration;

/// Public endpoint advertised through the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouteKey {
    /// Lowercased.
    pub hostname: String,
    pub port: u16,
    pub is_tls: bool,
}

impl RouteKey {
    #[must_use]
    pub fn new(hostname: &str, port: u16, mode: TransportMode) -> Self {
        Self {
            hostname: hostname.to_ascii_lowercase(),
            port,
            is_tls: mode.is_tls(),
        }
    }

    #[must_use]
    pub fn of(route: &RouteSpec) -> Self {
        Self::new(&route.hostname, route.port, route.mode)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.is_tls { "tls" } else { "tcp" };
        write!(f, "{scheme}://{}:{}", self.hostname, self.port)
    }
}

/// What a published route points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub resource: ResourceKey,
    pub local_port: u16,
}

/// An inbound connection as announced by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub hostname: String,
    pub port: u16,
    pub is_tls: bool,
}

impl InboundRequest {
    #[must_use]
    pub fn new(hostname: impl Into<String>, port: u16, is_tls: bool) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            is_tls,
        }
    }

    #[must_use]
    pub fn key(&self) -> RouteKey {
        RouteKey::new(&self.hostname, self.port, TransportMode::from_tls(self.is_tls))
    }
}

/// Where traffic for a resource goes from this member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Local,
    /// Led elsewhere; the peer address may not be known yet.
    Tunnel(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Host local services listen on.
    pub local_host: String,
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            local_host: "127.0.0.1".into(),
            dial_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// `host:port` of the relay; `None` disables the adapter.
    pub relay_addr: Option<String>,
    pub device_id: String,
    #[serde(with = "duration_secs")]
    pub token_ttl: Duration,
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
    #[serde(with = "duration_secs")]
    pub backoff_max: Duration,
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// A session up at least this long resets the reconnect backoff.
    #[serde(with = "duration_secs")]
    pub stable_after: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            relay_addr: None,
            device_id: String::new(),
            token_ttl: Duration::from_secs(300),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            stable_after: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Delay before reconnect attempt `attempt` (0-based): doubles from
    /// `backoff_base`, capped at `backoff_max`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.backoff_max)
    }
}

/// Relay connection state as seen by health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RelayState {
    Disabled,
    Disconnected,
    Connecting,
    Connected,
    Unauthenticated(String),
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
