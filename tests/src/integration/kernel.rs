//! Commands driven through a complete kernel graph: lifecycle, export and
//! import between nodes, and shutdown.

use hk_05_router::InboundRequest;
use shared_types::{
    ClusterMode, Command, CommandOutput, Credential, ErrorKind, ExportKind, MountMode,
    ResourceKey, RouteSpec, TransportMode, VolumeClass, VolumeOptions,
};

use super::support::{kernel, Kernel, PASSPHRASE};

fn blog() -> ResourceKey {
    ResourceKey::app("blog").unwrap()
}

fn blog_route() -> RouteSpec {
    RouteSpec {
        hostname: "blog.example.net".into(),
        port: 443,
        mode: TransportMode::Tls,
        local_port: 8080,
    }
}

async fn seed(k: &Kernel) {
    for command in [
        Command::RegisterResource {
            resource: blog(),
            mode: ClusterMode::Stateful,
        },
        Command::PublishRoute {
            resource: blog(),
            route: blog_route(),
        },
        Command::CreateVolume {
            class: VolumeClass::Control,
            name: "ctl".into(),
            opts: VolumeOptions::default(),
        },
        Command::CreateVolume {
            class: VolumeClass::Application,
            name: "blog-data".into(),
            opts: VolumeOptions::for_app("blog"),
        },
    ] {
        let result = k.run(command).await;
        assert!(result.ok, "{:?}", result.message);
    }
}

#[tokio::test]
async fn test_lifecycle_through_dispatcher() {
    let k = kernel().await;
    seed(&k).await;

    let attached = k
        .run(Command::AttachVolume {
            name: "blog-data".into(),
            mode: MountMode::ReadWrite,
        })
        .await;
    assert!(attached.ok, "{:?}", attached.message);
    assert_eq!(
        attached.output,
        CommandOutput::Volume {
            name: "blog-data".into(),
            mode: MountMode::ReadWrite,
        }
    );

    let target = k
        .graph
        .router
        .route(&InboundRequest::new("blog.example.net", 443, true))
        .unwrap();
    assert_eq!(target.resource, blog());
    assert_eq!(target.local_port, 8080);

    for kind in [ExportKind::FullData, ExportKind::ControlOnly] {
        let exported = k.run(Command::RunExport { kind }).await;
        assert!(exported.ok, "{kind}: {:?}", exported.message);
        let CommandOutput::Export { path, .. } = exported.output else {
            panic!("{kind}: expected export output");
        };
        assert!(path.join("manifest.json").exists());
    }

    assert!(k.run(Command::Lock).await.ok);
    let refused = k
        .run(Command::CreateVolume {
            class: VolumeClass::Control,
            name: "late".into(),
            opts: VolumeOptions::default(),
        })
        .await;
    assert_eq!(refused.error, Some(ErrorKind::Locked));
    let refused = k.run(Command::RunExport { kind: ExportKind::ControlOnly }).await;
    assert_eq!(refused.error, Some(ErrorKind::Locked));

    k.graph.routes.withdraw_resource(&blog());
    let unlocked = k
        .run(Command::Unlock {
            credential: Credential::new(PASSPHRASE),
        })
        .await;
    assert!(unlocked.ok, "{:?}", unlocked.message);
    assert_eq!(k.graph.routes.len(), 1);
}

#[tokio::test]
async fn test_import_completes_on_unlock() {
    let source = kernel().await;
    seed(&source).await;
    let revision = source.graph.store.revision();
    let checksum = source.graph.store.checksum();

    let exported = source
        .run(Command::RunExport { kind: ExportKind::ControlOnly })
        .await;
    let CommandOutput::Export { path, .. } = exported.output else {
        panic!("expected export output: {:?}", exported.message);
    };

    let target = kernel().await;
    let imported = target.run(Command::Import { path }).await;
    assert!(imported.ok, "{:?}", imported.message);
    assert!(target.graph.store.is_locked());
    assert!(!target.graph.store.is_ready());

    let unlocked = target
        .run(Command::Unlock {
            credential: Credential::new(PASSPHRASE),
        })
        .await;
    assert!(unlocked.ok, "{:?}", unlocked.message);
    assert!(target.graph.store.is_ready());
    assert_eq!(target.graph.store.revision(), revision);
    assert_eq!(target.graph.store.checksum(), checksum);

    // Desired state came across with the store.
    assert!(target.graph.volumes.get("ctl").is_some());
    assert!(target.graph.volumes.get("blog-data").is_some());
    assert_eq!(
        target.graph.leadership.registry().cluster_mode(&blog()),
        Some(ClusterMode::Stateful)
    );
    assert_eq!(target.graph.routes.len(), 1);
}

#[tokio::test]
async fn test_shutdown_refuses_commands_and_locks() {
    let k = kernel().await;
    seed(&k).await;

    k.graph.shutdown().await.unwrap();
    assert!(k.graph.store.is_locked());

    let result = k
        .run(Command::Unlock {
            credential: Credential::new(PASSPHRASE),
        })
        .await;
    assert_eq!(result.error, Some(ErrorKind::ShuttingDown));
}
