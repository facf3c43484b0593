//! At most one member commits to the kernel store at any instant, and a
//! transaction that outlives its leadership writes nothing.

use proptest::prelude::*;
use shared_types::{ErrorKind, KernelError, ResourceKey};

use hk_02_control_store::{KeyValueStore, StoreError};

use super::support::{runtime, Cluster, TTL_MS};

#[derive(Debug, Clone)]
enum Step {
    Advance(u64),
    Tick(usize),
    Partition(usize, bool),
    Failover(usize),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1u64..=TTL_MS * 2).prop_map(Step::Advance),
        (0usize..2).prop_map(Step::Tick),
        (0usize..2, any::<bool>()).prop_map(|(m, p)| Step::Partition(m, p)),
        (0usize..2).prop_map(Step::Failover),
    ]
}

async fn apply(cluster: &Cluster, step: &Step) {
    match step {
        Step::Advance(ms) => cluster.clock.advance(*ms),
        Step::Tick(i) => cluster.members[*i].provider.tick().await,
        Step::Partition(i, on) => cluster
            .arbiter
            .set_partitioned(&cluster.members[*i].id, *on),
        Step::Failover(i) => {
            // Refused while partitioned or not holding; both are fine here.
            let _ = cluster.members[*i]
                .leadership
                .failover(&ResourceKey::Kernel)
                .await;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_single_writer(steps in prop::collection::vec(step(), 1..24)) {
        runtime().block_on(async {
            let cluster = Cluster::new(&["a", "b"]).await;
            for (i, step) in steps.iter().enumerate() {
                apply(&cluster, step).await;
                let leaders = cluster.leaders();
                assert!(leaders.len() <= 1, "step {i} {step:?}: leaders {leaders:?}");

                let mut committed = Vec::new();
                for member in &cluster.members {
                    let mut tx = member.store.begin();
                    tx.put(format!("probe/{i}"), member.id.clone().into_bytes());
                    match member.store.commit(tx).await {
                        Ok(_) => committed.push(member.id.as_str()),
                        Err(StoreError::NotLeader { .. }) => {}
                        Err(e) => panic!("step {i}: unexpected commit error {e}"),
                    }
                }
                assert_eq!(committed, leaders, "step {i} {step:?}");
            }
        });
    }
}

#[tokio::test]
async fn test_demotion_mid_write_leaves_no_record() {
    let cluster = Cluster::new(&["a", "b"]).await;
    let (a, b) = (&cluster.members[0], &cluster.members[1]);
    assert_eq!(cluster.leaders(), vec!["a"]);

    let mut tx = a.store.begin();
    tx.put("apps/blog", b"{\"mode\":\"stateful\"}".to_vec());

    cluster.arbiter.set_partitioned("a", true);
    cluster.clock.advance(TTL_MS + 1);
    cluster.tick_all().await;
    assert_eq!(cluster.leaders(), vec!["b"]);

    let revision = a.store.revision();
    let err = a.store.commit(tx).await.unwrap_err();
    assert!(matches!(err, StoreError::NotLeader { .. }));
    assert_eq!(KernelError::from(err).kind(), ErrorKind::NotLeader);

    assert_eq!(a.store.get("apps/blog").unwrap(), None);
    assert_eq!(a.store.revision(), revision);
    assert!(!cluster.kv.exists(b"rec/apps/blog").unwrap());
    assert_eq!(b.store.get("apps/blog").unwrap(), None);
}

#[tokio::test]
async fn test_transaction_from_earlier_term_rejected() {
    let cluster = Cluster::new(&["a", "b"]).await;
    let (a, b) = (&cluster.members[0], &cluster.members[1]);

    let mut tx = a.store.begin();
    tx.put("apps/notes", b"{}".to_vec());

    // a -> b -> a: a leads again, under a later generation.
    a.leadership.failover(&ResourceKey::Kernel).await.unwrap();
    b.provider.tick().await;
    assert!(b.leads_kernel());
    b.leadership.failover(&ResourceKey::Kernel).await.unwrap();
    cluster.clock.advance(TTL_MS + 1);
    a.provider.tick().await;
    assert!(a.leads_kernel());

    let err = a.store.commit(tx).await.unwrap_err();
    assert!(matches!(err, StoreError::NotLeader { .. }));
    assert!(!cluster.kv.exists(b"rec/apps/notes").unwrap());

    let mut fresh = a.store.begin();
    fresh.put("apps/notes", b"{}".to_vec());
    a.store.commit(fresh).await.unwrap();
    assert!(cluster.kv.exists(b"rec/apps/notes").unwrap());
}
