//! # Shared Bus - Kernel Event Bus
//!
//! Topic-based publish/subscribe backbone every kernel component depends on.
//!
//! ## Delivery Rules
//!
//! - **At-most-once** per subscriber; a lagging subscriber loses events.
//! - **Ordered per topic per publisher**, not across topics. Handlers re-read
//!   current state instead of trusting event order.
//! - **No persistence**: events published before a subscription are gone.
//!   Components needing startup state query the registry or store directly
//!   after subscribing.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Leadership  │                    │   Volume     │
//! │   Registry   │    publish()       │   Manager    │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{Event, EventFilter, EventTopic, KernelEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before it lags.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
