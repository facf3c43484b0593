//! # Command Surface
//!
//! Closed set of typed, idempotent requests accepted by the dispatcher, and
//! the structured result returned for each.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::entities::{
    validate_name, ClusterMode, ExportKind, MountMode, ResourceKey, TransportMode, VolumeClass,
    VolumeOptions,
};
use crate::errors::{ErrorKind, KernelError};

/// Unlock passphrase. Redacted in `Debug`, wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A loopback service exposed through the relay under `hostname:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteSpec {
    pub hostname: String,
    pub port: u16,
    pub mode: TransportMode,
    pub local_port: u16,
}

/// Typed kernel commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    CreateVolume {
        class: VolumeClass,
        name: String,
        #[serde(default)]
        opts: VolumeOptions,
    },
    AttachVolume {
        name: String,
        mode: MountMode,
    },
    DetachVolume {
        name: String,
    },
    RunExport {
        kind: ExportKind,
    },
    Import {
        path: PathBuf,
    },
    PublishRoute {
        resource: ResourceKey,
        route: RouteSpec,
    },
    WithdrawRoute {
        hostname: String,
        port: u16,
        mode: TransportMode,
    },
    Unlock {
        credential: Credential,
    },
    Lock,
    RegisterResource {
        resource: ResourceKey,
        mode: ClusterMode,
    },
    Failover {
        resource: ResourceKey,
    },
    /// Operator sign-off after a lossy store recovery.
    AcknowledgeRecovery,
}

impl Command {
    /// Short name for logs and metrics labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateVolume { .. } => "create_volume",
            Self::AttachVolume { .. } => "attach_volume",
            Self::DetachVolume { .. } => "detach_volume",
            Self::RunExport { .. } => "run_export",
            Self::Import { .. } => "import",
            Self::PublishRoute { .. } => "publish_route",
            Self::WithdrawRoute { .. } => "withdraw_route",
            Self::Unlock { .. } => "unlock",
            Self::Lock => "lock",
            Self::RegisterResource { .. } => "register_resource",
            Self::Failover { .. } => "failover",
            Self::AcknowledgeRecovery => "acknowledge_recovery",
        }
    }

    /// Shape checks that need no kernel state.
    pub fn validate(&self) -> Result<(), KernelError> {
        match self {
            Self::CreateVolume { class, name, opts } => {
                validate_name(name)?;
                match (class, &opts.app) {
                    (VolumeClass::Application, None) => Err(KernelError::invalid(
                        "application volume requires an owning app",
                    )),
                    (VolumeClass::Application, Some(app)) => validate_name(app),
                    (_, Some(_)) => Err(KernelError::invalid(format!(
                        "{class} volume cannot name an app"
                    ))),
                    (_, None) => Ok(()),
                }
            }
            Self::AttachVolume { name, mode } => {
                validate_name(name)?;
                if *mode == MountMode::Denied {
                    return Err(KernelError::invalid("cannot attach in mode denied"));
                }
                Ok(())
            }
            Self::DetachVolume { name } => validate_name(name),
            Self::PublishRoute { route, .. } => {
                validate_hostname(&route.hostname)?;
                if route.port == 0 || route.local_port == 0 {
                    return Err(KernelError::invalid("ports must be non-zero"));
                }
                Ok(())
            }
            Self::WithdrawRoute { hostname, .. } => validate_hostname(hostname),
            Self::Unlock { credential } if credential.is_empty() => {
                Err(KernelError::invalid("empty credential"))
            }
            Self::Import { path } if path.as_os_str().is_empty() => {
                Err(KernelError::invalid("empty import path"))
            }
            _ => Ok(()),
        }
    }
}

fn validate_hostname(hostname: &str) -> Result<(), KernelError> {
    let ok = !hostname.is_empty()
        && hostname.len() <= 253
        && hostname
            .split('.')
            .all(|label| !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if ok {
        Ok(())
    } else {
        Err(KernelError::invalid(format!("invalid hostname '{hostname}'")))
    }
}

/// Payload of a successful command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandOutput {
    #[default]
    Done,
    Volume {
        name: String,
        mode: MountMode,
    },
    Export {
        path: PathBuf,
        manifest: serde_json::Value,
    },
}

/// Structured `{ok, error?}` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub correlation_id: Uuid,
    pub ok: bool,
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub output: CommandOutput,
}

impl CommandResult {
    pub fn success(correlation_id: Uuid, output: CommandOutput) -> Self {
        Self {
            correlation_id,
            ok: true,
            error: None,
            message: None,
            output,
        }
    }

    pub fn failure(correlation_id: Uuid, err: &KernelError) -> Self {
        Self {
            correlation_id,
            ok: false,
            error: Some(err.kind()),
            message: Some(err.to_string()),
            output: CommandOutput::Done,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_redacted() {
        let cred = Credential::new("hunter2");
        assert_eq!(format!("{cred:?}"), "Credential(***)");
        let cmd = Command::Unlock { credential: cred };
        assert!(!format!("{cmd:?}").contains("hunter2"));
    }

    #[test]
    fn test_application_volume_requires_app() {
        let cmd = Command::CreateVolume {
            class: VolumeClass::Application,
            name: "data".into(),
            opts: VolumeOptions::default(),
        };
        assert_eq!(cmd.validate().unwrap_err().kind(), ErrorKind::InvalidCommand);

        let cmd = Command::CreateVolume {
            class: VolumeClass::Application,
            name: "data".into(),
            opts: VolumeOptions::for_app("blog"),
        };
        assert!(cmd.validate().is_ok());

        let cmd = Command::CreateVolume {
            class: VolumeClass::Control,
            name: "ctl".into(),
            opts: VolumeOptions::for_app("blog"),
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_route_validation() {
        let route = RouteSpec {
            hostname: "blog.example.net".into(),
            port: 443,
            mode: TransportMode::Tls,
            local_port: 8080,
        };
        let cmd = Command::PublishRoute {
            resource: ResourceKey::app("blog").unwrap(),
            route: route.clone(),
        };
        assert!(cmd.validate().is_ok());

        let cmd = Command::PublishRoute {
            resource: ResourceKey::Kernel,
            route: RouteSpec {
                hostname: "bad..host".into(),
                ..route
            },
        };
        assert!(cmd.validate().is_err());
    }

    #[test]
    fn test_command_json_shape() {
        let json = r#"{"type":"run_export","kind":"control_only"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(
            cmd,
            Command::RunExport {
                kind: ExportKind::ControlOnly
            }
        ));
        assert_eq!(cmd.name(), "run_export");
    }

    #[test]
    fn test_failure_result_carries_kind() {
        let id = Uuid::new_v4();
        let result = CommandResult::failure(id, &KernelError::ShuttingDown);
        assert_eq!(result.correlation_id, id);
        assert!(!result.ok);
        assert_eq!(result.error, Some(ErrorKind::ShuttingDown));
    }
}
