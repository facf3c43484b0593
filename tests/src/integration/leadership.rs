//! Stateless resources are pinned to `FollowerWarm` on every member and
//! never reach the consensus provider.

use shared_bus::{EventFilter, EventTopic, KernelEvent};
use shared_types::{ClusterMode, ResourceKey, Role};

use hk_01_leadership::LeadershipError;

use super::support::{Cluster, TTL_MS};

#[tokio::test]
async fn test_stateless_app_never_elects() {
    let cluster = Cluster::new(&["a", "b", "c"]).await;
    let docs = ResourceKey::app("docs").unwrap();

    let mut subs: Vec<_> = cluster
        .members
        .iter()
        .map(|m| m.bus.subscribe(EventFilter::topic(EventTopic::LeadershipRoleChanged)))
        .collect();
    let elections: Vec<u64> = cluster.members.iter().map(|m| m.leadership.elections()).collect();

    for member in &cluster.members {
        member
            .leadership
            .register(docs.clone(), ClusterMode::StatelessReadOnly)
            .await
            .unwrap();
        assert_eq!(member.registry().get_role(&docs), Role::FollowerWarm);
    }

    for (member, before) in cluster.members.iter().zip(&elections) {
        assert_eq!(member.leadership.elections(), *before, "member {}", member.id);
    }
    assert_eq!(cluster.arbiter.holder(&docs), None);

    for sub in &mut subs {
        for event in sub.drain() {
            if let KernelEvent::LeadershipRoleChanged { resource, role, .. } = event.payload {
                if resource == docs {
                    assert_eq!(role, Role::FollowerWarm);
                }
            }
        }
    }

    // Lease rounds and time do not touch the pinned role.
    cluster.clock.advance(TTL_MS * 3);
    cluster.tick_all().await;
    for member in &cluster.members {
        assert_eq!(member.registry().get_role(&docs), Role::FollowerWarm);
        assert!(matches!(
            member.leadership.failover(&docs).await,
            Err(LeadershipError::Pinned(_))
        ));
    }
}

#[tokio::test]
async fn test_mode_conflict_rejected() {
    let cluster = Cluster::new(&["a"]).await;
    let member = &cluster.members[0];
    let blog = ResourceKey::app("blog").unwrap();

    member
        .leadership
        .register(blog.clone(), ClusterMode::Stateful)
        .await
        .unwrap();
    assert!(member.registry().is_leader(&blog));
    assert!(matches!(
        member
            .leadership
            .register(blog, ClusterMode::StatelessReadOnly)
            .await,
        Err(LeadershipError::ModeConflict { .. })
    ));
}
