//! # Kernel Events
//!
//! Every event that flows through the bus, one variant per topic. Payloads
//! are immutable once published; delivery is fire-and-forget.

use serde::{Deserialize, Serialize};
use shared_types::{unix_now, DiskStatus, ExportKind, MountMode, ResourceKey, Role, StoreHealth};

/// Event payloads, one variant per topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum KernelEvent {
    // =========================================================================
    // CONTROL STORE
    // =========================================================================
    /// The control store key vault was sealed or opened.
    LockStateChanged { locked: bool },

    /// A write was committed.
    ControlStoreCommit { revision: u64, checksum: String },

    /// Integrity status changed, or a repair step finished.
    ControlStoreHealth {
        status: StoreHealth,
        detail: Option<String>,
    },

    // =========================================================================
    // LEADERSHIP
    // =========================================================================
    /// This member's role for `resource` changed.
    ///
    /// `generation` increases by one per transition of that resource.
    LeadershipRoleChanged {
        resource: ResourceKey,
        role: Role,
        peer_addr: Option<String>,
        generation: u64,
    },

    // =========================================================================
    // VOLUMES
    // =========================================================================
    /// A volume was remounted (or detached) to match its resource's role.
    VolumeRoleChanged {
        resource: ResourceKey,
        volume: String,
        mode: MountMode,
    },

    /// Free-space status of a monitored disk changed.
    DiskEvent {
        disk: String,
        status: DiskStatus,
        available_bytes: u64,
    },

    // =========================================================================
    // EXPORTS
    // =========================================================================
    /// An export finished, successfully or not.
    ExportResult {
        kind: ExportKind,
        ok: bool,
        manifest: Option<serde_json::Value>,
        error: Option<String>,
    },
}

impl KernelEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::LockStateChanged { .. } => EventTopic::LockStateChanged,
            Self::ControlStoreCommit { .. } => EventTopic::ControlStoreCommit,
            Self::ControlStoreHealth { .. } => EventTopic::ControlStoreHealth,
            Self::LeadershipRoleChanged { .. } => EventTopic::LeadershipRoleChanged,
            Self::VolumeRoleChanged { .. } => EventTopic::VolumeRoleChanged,
            Self::DiskEvent { .. } => EventTopic::DiskEvent,
            Self::ExportResult { .. } => EventTopic::ExportResult,
        }
    }

    /// Resource the event is scoped to, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&ResourceKey> {
        match self {
            Self::LeadershipRoleChanged { resource, .. }
            | Self::VolumeRoleChanged { resource, .. } => Some(resource),
            Self::ControlStoreCommit { .. }
            | Self::ControlStoreHealth { .. }
            | Self::LockStateChanged { .. } => Some(&ResourceKey::Kernel),
            Self::DiskEvent { .. } | Self::ExportResult { .. } => None,
        }
    }
}

/// An event as delivered: `{topic, payload, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: EventTopic,
    pub payload: KernelEvent,
    /// Unix seconds at publish time.
    pub timestamp: u64,
}

impl Event {
    #[must_use]
    pub fn new(payload: KernelEvent) -> Self {
        Self {
            topic: payload.topic(),
            payload,
            timestamp: unix_now(),
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    LockStateChanged,
    LeadershipRoleChanged,
    VolumeRoleChanged,
    DiskEvent,
    ExportResult,
    ControlStoreHealth,
    ControlStoreCommit,
}

impl EventTopic {
    pub const ALL: [EventTopic; 7] = [
        EventTopic::LockStateChanged,
        EventTopic::LeadershipRoleChanged,
        EventTopic::VolumeRoleChanged,
        EventTopic::DiskEvent,
        EventTopic::ExportResult,
        EventTopic::ControlStoreHealth,
        EventTopic::ControlStoreCommit,
    ];
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Resources to include. Empty means all resources; unscoped events
    /// never match a non-empty list.
    pub resources: Vec<ResourceKey>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            resources: Vec::new(),
        }
    }

    #[must_use]
    pub fn topic(topic: EventTopic) -> Self {
        Self::topics(vec![topic])
    }

    /// Narrow to events scoped to `resource`.
    #[must_use]
    pub fn for_resource(mut self, resource: ResourceKey) -> Self {
        self.resources.push(resource);
        self
    }

    /// Topics this filter can match, for subscriber accounting.
    #[must_use]
    pub fn effective_topics(&self) -> Vec<EventTopic> {
        if self.topics.is_empty() {
            EventTopic::ALL.to_vec()
        } else {
            self.topics.clone()
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &KernelEvent) -> bool {
        let topic_match = self.topics.is_empty() || self.topics.contains(&event.topic());

        let resource_match = self.resources.is_empty()
            || event
                .resource()
                .is_some_and(|r| self.resources.contains(r));

        topic_match && resource_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role_event(app: &str, role: Role) -> KernelEvent {
        KernelEvent::LeadershipRoleChanged {
            resource: ResourceKey::app(app).unwrap(),
            role,
            peer_addr: None,
            generation: 1,
        }
    }

    #[test]
    fn test_event_topic_mapping() {
        let event = role_event("blog", Role::Leader);
        assert_eq!(event.topic(), EventTopic::LeadershipRoleChanged);

        let event = KernelEvent::ControlStoreCommit {
            revision: 3,
            checksum: "ab".into(),
        };
        assert_eq!(event.topic(), EventTopic::ControlStoreCommit);
        assert_eq!(event.resource(), Some(&ResourceKey::Kernel));
    }

    #[test]
    fn test_filter_all() {
        assert!(EventFilter::all().matches(&role_event("blog", Role::Leader)));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topic(EventTopic::ControlStoreHealth);
        assert!(!filter.matches(&role_event("blog", Role::Leader)));
        assert!(filter.matches(&KernelEvent::ControlStoreHealth {
            status: StoreHealth::Degraded,
            detail: Some("checksum mismatch".into()),
        }));
    }

    #[test]
    fn test_filter_by_resource() {
        let filter = EventFilter::topic(EventTopic::LeadershipRoleChanged)
            .for_resource(ResourceKey::app("blog").unwrap());
        assert!(filter.matches(&role_event("blog", Role::FollowerCold)));
        assert!(!filter.matches(&role_event("photos", Role::FollowerCold)));

        let unscoped = EventFilter::all().for_resource(ResourceKey::Kernel);
        assert!(!unscoped.matches(&KernelEvent::DiskEvent {
            disk: "/data".into(),
            status: DiskStatus::Low,
            available_bytes: 1,
        }));
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::new(KernelEvent::LockStateChanged { locked: true });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["topic"], "LockStateChanged");
        assert_eq!(json["payload"]["payload"]["locked"], true);
    }
}
