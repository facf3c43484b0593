//! # Router & Relay Adapter (hk-05)
//!
//! Exposes local services through a public relay and decides, per inbound
//! connection, whether this member serves it.
//!
//! ```text
//!   relay ══control══▶ RelayAdapter ──OpenStream──▶ Router ──resolve──▶ RouteTable
//!     ▲                     │                          │                   (RemoteResolver)
//!     └═══data (Attach)═════┘◀──── copy_bidirectional ─┘──dial──▶ 127.0.0.1:<local_port>
//! ```
//!
//! ## Rules
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | endpoint not published | `NoRoute`, nothing dialed |
//! | this member leads, or resource is stateless | dial local port and pipe |
//! | another member leads | `NoRoute` naming the peer |
//! | relay rejects the token | fresh token, reconnect at once |
//! | relay unreachable | capped exponential backoff |
//!
//! Local routing never depends on relay state.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod relay;
pub mod route_table;
pub mod router;
pub mod token;
pub mod wire;

pub use adapters::TcpDialer;
pub use domain::{
    InboundRequest, RelayConfig, RelayError, RelayState, ResolvedTarget, RouteDecision, RouteKey,
    RouterConfig, RouterError, RouterResult, TokenError, WireError,
};
pub use ports::{BoxedStream, ByteStream, Dialer, RemoteResolver, TokenProvider};
pub use relay::{RelayAdapter, RelayStats};
pub use route_table::RouteTable;
pub use router::{Router, RouterStats};
pub use token::{verify_token, SignedTokenProvider, TokenClaims};
pub use wire::{read_frame, write_frame, Frame, MAX_FRAME_LEN};
