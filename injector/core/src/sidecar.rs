use crate::{
    config::FlagdConfig,
    k8s::{
        api::core::v1::{
            Capabilities, ConfigMapVolumeSource, ContainerPort, HTTPGetAction, Probe,
            SeccompProfile, SecurityContext,
        },
        apimachinery::pkg::util::intstr::IntOrString,
        Container, EnvVar, PodSpec, ResourceRequirements, Volume, VolumeMount,
    },
    source::{FileMount, ResolvedSource},
};

/// The reserved name of the injected container.
pub const CONTAINER_NAME: &str = "flagd";

pub const MANAGEMENT_PORT_NAME: &str = "management";

const NONROOT_UID: i64 = 65532;

/// A flagd container ready to be placed into a pod.
#[derive(Clone, Debug, PartialEq)]
pub struct Sidecar {
    container: Container,
    env: Vec<EnvVar>,
    volumes: Vec<Volume>,
}

impl Sidecar {
    pub fn new(
        config: &FlagdConfig,
        sources: &[ResolvedSource],
        mounts: &[FileMount],
    ) -> Result<Self, serde_json::Error> {
        let mut args = vec!["start".to_string()];
        if !sources.is_empty() {
            args.push("--sources".to_string());
            args.push(serde_json::to_string(sources)?);
        }
        for arg in &config.sync_provider_args {
            args.push("--sync-provider-args".to_string());
            args.push(arg.clone());
        }
        if config.debug_logging() {
            args.push("--debug".to_string());
        }

        let env = config.env_vars();
        let (liveness_probe, readiness_probe) = if config.probes_enabled() {
            (
                Some(http_probe("/healthz", config.management_port)),
                Some(http_probe("/readyz", config.management_port)),
            )
        } else {
            (None, None)
        };

        let volume_mounts = mounts
            .iter()
            .map(|m| VolumeMount {
                name: m.volume.clone(),
                mount_path: m.mount_path.clone(),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let volumes = mounts
            .iter()
            .map(|m| Volume {
                name: m.volume.clone(),
                config_map: Some(ConfigMapVolumeSource {
                    name: m.config_map.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        let resources = if config.resources == ResourceRequirements::default() {
            None
        } else {
            Some(config.resources.clone())
        };

        let container = Container {
            name: CONTAINER_NAME.to_string(),
            image: Some(config.image()),
            args: Some(args),
            env: Some(env.clone()),
            ports: Some(vec![ContainerPort {
                name: Some(MANAGEMENT_PORT_NAME.to_string()),
                container_port: config.management_port.into(),
                ..Default::default()
            }]),
            liveness_probe,
            readiness_probe,
            security_context: Some(security_context()),
            resources,
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            ..Default::default()
        };

        Ok(Self {
            container,
            env,
            volumes,
        })
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Places the sidecar into `spec`, replacing any container that already
    /// carries the reserved name. Volumes are matched by name, and only
    /// injector-owned names carry the mount volume prefix.
    ///
    /// The sidecar's environment is also added to every other container so
    /// applications can find flagd; variables a container already defines
    /// are left as they are.
    pub fn inject(self, spec: &mut PodSpec) {
        let Self {
            container,
            env,
            volumes,
        } = self;

        for app in spec
            .containers
            .iter_mut()
            .filter(|c| c.name != CONTAINER_NAME)
        {
            let app_env = app.env.get_or_insert_with(Vec::new);
            for var in &env {
                if !app_env.iter().any(|v| v.name == var.name) {
                    app_env.push(var.clone());
                }
            }
        }

        if !volumes.is_empty() {
            let pod_volumes = spec.volumes.get_or_insert_with(Vec::new);
            for volume in volumes {
                match pod_volumes.iter_mut().find(|v| v.name == volume.name) {
                    Some(existing) => *existing = volume,
                    None => pod_volumes.push(volume),
                }
            }
        }

        match spec
            .containers
            .iter_mut()
            .find(|c| c.name == CONTAINER_NAME)
        {
            Some(existing) => *existing = container,
            None => spec.containers.push(container),
        }
    }
}

fn http_probe(path: &str, port: u16) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port.into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(60),
        ..Default::default()
    }
}

fn security_context() -> SecurityContext {
    SecurityContext {
        run_as_user: Some(NONROOT_UID),
        run_as_group: Some(NONROOT_UID),
        run_as_non_root: Some(true),
        privileged: Some(false),
        allow_privilege_escalation: Some(false),
        read_only_root_filesystem: Some(true),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: None,
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            localhost_profile: None,
        }),
        ..Default::default()
    }
}
