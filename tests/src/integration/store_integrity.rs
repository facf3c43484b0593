//! Revision and checksum behavior of committed writes, and what a
//! corrupted store refuses to do.

use std::time::Duration;

use hk_02_control_store::KeyValueStore;
use shared_bus::{EventFilter, EventTopic, KernelEvent};
use shared_types::{
    Command, Credential, ErrorKind, ExportKind, StoreHealth, VolumeClass, VolumeOptions,
};

use super::support::{kernel, single_node, PASSPHRASE};

#[tokio::test]
async fn test_revisions_step_by_one() {
    let node = single_node().await;
    let mut revision = node.store.revision();
    let mut checksum = node.store.checksum();

    for i in 0..12u8 {
        let mut tx = node.store.begin();
        tx.put(format!("remote/entry-{i}"), vec![i; 16]);
        let receipt = node.store.commit(tx).await.unwrap();

        assert_eq!(receipt.revision, revision + 1);
        assert_ne!(receipt.checksum, checksum);
        assert_eq!(node.store.checksum(), receipt.checksum);
        assert_eq!(
            node.store.get(&format!("remote/entry-{i}")).unwrap(),
            Some(vec![i; 16])
        );
        revision = receipt.revision;
        checksum = receipt.checksum;
    }
}

#[tokio::test]
async fn test_identical_content_keeps_checksum() {
    let node = single_node().await;
    let mut tx = node.store.begin();
    tx.put("remote/config", b"v1".to_vec());
    let first = node.store.commit(tx).await.unwrap();

    let mut tx = node.store.begin();
    tx.put("remote/config", b"v1".to_vec());
    let second = node.store.commit(tx).await.unwrap();

    assert_eq!(second.revision, first.revision + 1);
    assert_eq!(second.checksum, first.checksum);
}

#[tokio::test]
async fn test_relock_reproduces_state() {
    let node = single_node().await;
    for i in 0..10u8 {
        let mut tx = node.store.begin();
        tx.put(format!("remote/k{i}"), vec![i]);
        node.store.commit(tx).await.unwrap();
    }
    let (revision, checksum) = (node.store.revision(), node.store.checksum());

    node.store.lock().await.unwrap();
    assert!(node.store.get("remote/k0").is_err());
    node.store.unlock(&Credential::new(PASSPHRASE)).await.unwrap();

    assert_eq!(node.store.revision(), revision);
    assert_eq!(node.store.checksum(), checksum);
    assert_eq!(node.store.health(), StoreHealth::Healthy);
    assert_eq!(node.store.get("remote/k9").unwrap(), Some(vec![9]));
}

#[tokio::test]
async fn test_corrupted_store_blocks_export() {
    let k = kernel().await;
    let created = k
        .run(Command::CreateVolume {
            class: VolumeClass::Control,
            name: "ctl".into(),
            opts: VolumeOptions::default(),
        })
        .await;
    assert!(created.ok, "{:?}", created.message);

    let exported = k.run(Command::RunExport { kind: ExportKind::ControlOnly }).await;
    assert!(exported.ok, "healthy store should export: {:?}", exported.message);

    let mut health = k
        .graph
        .bus
        .subscribe(EventFilter::topic(EventTopic::ControlStoreHealth));
    let (record, _) = k.kv.prefix_scan(b"rec/").unwrap().into_iter().next().unwrap();
    assert!(k.kv.tamper(&record, |sealed| sealed[0] ^= 0xff));

    let report = k.graph.store.verify_integrity().await.unwrap();
    assert!(!report.is_ok());

    let event = tokio::time::timeout(Duration::from_secs(2), health.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event.payload,
        KernelEvent::ControlStoreHealth {
            status: StoreHealth::Degraded,
            ..
        }
    ));

    let refused = k.run(Command::RunExport { kind: ExportKind::ControlOnly }).await;
    assert!(!refused.ok);
    assert_eq!(refused.error, Some(ErrorKind::StoreUnhealthy));
}
