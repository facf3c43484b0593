//! Mount modes follow roles, and volume creation is idempotent.

use std::sync::Arc;

use hk_01_leadership::{Leadership, LeadershipRegistry, RoleUpdate, SingleNodeProvider, SystemTimeSource};
use hk_02_control_store::{ControlStore, ControlStoreConfig, InMemoryKVStore};
use hk_03_volume_manager::{allowed_mode, InMemoryMountBackend, VolumeError, VolumeManager};
use shared_bus::InMemoryEventBus;
use shared_types::{
    ClusterMode, Command, Component, Credential, ErrorKind, KernelError, MountMode, ResourceKey,
    Role, ShutdownSignal, VolumeClass, VolumeOptions, VolumeSpec,
};

use super::support::{kernel, PASSPHRASE};

const CLASSES: [VolumeClass; 3] = [
    VolumeClass::Bootstrap,
    VolumeClass::Control,
    VolumeClass::Application,
];
const MODES: [ClusterMode; 2] = [ClusterMode::Stateful, ClusterMode::StatelessReadOnly];

#[test]
fn test_read_write_requires_leader() {
    for class in CLASSES {
        for mode in MODES {
            for role in Role::ALL {
                let allowed = allowed_mode(class, mode, role);
                if class != VolumeClass::Bootstrap && allowed == MountMode::ReadWrite {
                    assert_eq!(role, Role::Leader, "{class:?} {mode:?}");
                }
                if mode == ClusterMode::StatelessReadOnly && class != VolumeClass::Bootstrap {
                    assert_eq!(allowed, MountMode::ReadOnly, "{class:?} {role:?}");
                }
            }
        }
    }
}

struct Fixture {
    registry: LeadershipRegistry,
    manager: VolumeManager,
    _leadership: Leadership,
}

async fn fixture() -> Fixture {
    let bus = Arc::new(InMemoryEventBus::new());
    let registry = LeadershipRegistry::new("solo", bus.clone(), Arc::new(SystemTimeSource));
    let leadership = Leadership::new(registry.clone(), Arc::new(SingleNodeProvider::new()));
    let (_tx, shutdown) = ShutdownSignal::channel();
    leadership.start(shutdown).await.unwrap();
    leadership.register(ResourceKey::Kernel, ClusterMode::Stateful).await.unwrap();
    leadership
        .register(ResourceKey::app("blog").unwrap(), ClusterMode::Stateful)
        .await
        .unwrap();
    leadership
        .register(ResourceKey::app("docs").unwrap(), ClusterMode::StatelessReadOnly)
        .await
        .unwrap();

    let store = ControlStore::open(
        InMemoryKVStore::new(),
        Arc::new(registry.clone()),
        bus.clone(),
        ControlStoreConfig::for_testing(),
    )
    .unwrap();
    store.unlock(&Credential::new(PASSPHRASE)).await.unwrap();

    let manager = VolumeManager::new(
        Arc::new(InMemoryMountBackend::new()),
        Arc::new(registry.clone()),
        bus,
        Some(store),
    );
    Fixture {
        registry,
        manager,
        _leadership: leadership,
    }
}

impl Fixture {
    async fn set_role(&self, resource: &ResourceKey, role: Role) {
        self.registry
            .writer()
            .write(RoleUpdate {
                resource: resource.clone(),
                role,
                peer_addr: (role != Role::Leader).then(|| "10.0.0.9:9470".to_string()),
                lease_until_ms: None,
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_attach_follows_role_table() {
    let f = fixture().await;
    let blog = ResourceKey::app("blog").unwrap();
    let docs = ResourceKey::app("docs").unwrap();

    for (i, role) in Role::ALL.into_iter().enumerate() {
        f.set_role(&ResourceKey::Kernel, role).await;
        f.set_role(&blog, role).await;

        let cases = [
            (format!("ctl-{i}"), VolumeClass::Control, VolumeOptions::default(), ResourceKey::Kernel, ClusterMode::Stateful),
            (format!("blog-{i}"), VolumeClass::Application, VolumeOptions::for_app("blog"), blog.clone(), ClusterMode::Stateful),
            (format!("docs-{i}"), VolumeClass::Application, VolumeOptions::for_app("docs"), docs.clone(), ClusterMode::StatelessReadOnly),
        ];
        for (name, class, opts, owner, mode) in cases {
            let effective = f.registry.get_role(&owner);
            let expected = allowed_mode(class, mode, effective);
            f.manager
                .create_volume(VolumeSpec::new(name.clone(), class, opts))
                .await
                .unwrap();

            let rw = f.manager.attach_volume(&name, MountMode::ReadWrite).await;
            assert_eq!(rw.is_ok(), expected == MountMode::ReadWrite, "{name} as {effective:?}");
            match rw {
                Ok(attachment) => {
                    assert_eq!(effective, Role::Leader);
                    assert_eq!(attachment.mode, MountMode::ReadWrite);
                }
                Err(e) => {
                    assert!(matches!(e, VolumeError::Denied { .. }));
                    assert_eq!(KernelError::from(e).kind(), ErrorKind::VolumeDenied);
                }
            }

            let ro = f.manager.attach_volume(&name, MountMode::ReadOnly).await;
            assert_eq!(ro.is_ok(), expected.permits(MountMode::ReadOnly), "{name} ro");
        }
    }
}

#[tokio::test]
async fn test_create_volume_idempotent() {
    let k = kernel().await;
    let create = || Command::CreateVolume {
        class: VolumeClass::Application,
        name: "blog-data".into(),
        opts: VolumeOptions::for_app("blog"),
    };

    let first = k.run(create()).await;
    let second = k.run(create()).await;
    assert!(first.ok, "{:?}", first.message);
    assert!(second.ok, "{:?}", second.message);
    assert_eq!(
        k.graph
            .volumes
            .list()
            .iter()
            .filter(|v| v.spec.name == "blog-data")
            .count(),
        1
    );

    let conflicting = k
        .run(Command::CreateVolume {
            class: VolumeClass::Application,
            name: "blog-data".into(),
            opts: VolumeOptions::for_app("notes"),
        })
        .await;
    assert_eq!(conflicting.error, Some(ErrorKind::Conflict));
}
