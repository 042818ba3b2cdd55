//! Pod spec translation
//!
//! Turns an abstract [`PodSpec`](crate::specs::PodSpec) into the native
//! Kubernetes pod spec the workload builders embed, leaving nothing for
//! them to interpret.
//!
//! # Steps
//!
//! 1. Provider pod attributes are copied 1:1
//! 2. Containers are mapped field by field; protocols default to TCP
//! 3. Config renders to name-sorted environment variables
//! 4. Private images get an image-pull secret named `<prefix>-<container>-secret`
//! 5. Provider container attributes replace probes and pull policy
//!
//! File sets additionally become config-map volumes; the config maps they
//! need are returned alongside the pod spec.

pub mod env;
pub mod secrets;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, KeyToPath, LocalObjectReference,
    PodSpec as NativePodSpec, Volume, VolumeMount,
};

use crate::specs::{ContainerSpec, KubernetesPodExtension, PodSpec};
use crate::{file_set_config_map_name, image_pull_secret_name, Result};

/// Default transport protocol for container ports
pub const DEFAULT_PROTOCOL: &str = "TCP";

/// An image-pull secret the pod references and the broker must create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePullSecret {
    /// Secret name
    pub name: String,
    /// `.dockerconfigjson` document
    pub docker_config_json: String,
}

/// A config map backing a file-set volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConfigMap {
    /// Config map name
    pub name: String,
    /// File name -> content
    pub data: BTreeMap<String, String>,
}

/// Translated pod spec plus the objects it depends on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitSpec {
    /// Native pod spec
    pub pod: NativePodSpec,
    /// Image-pull secrets referenced by `pod.image_pull_secrets`
    pub image_pull_secrets: Vec<ImagePullSecret>,
    /// Config maps referenced by file-set volumes
    pub file_config_maps: Vec<FileConfigMap>,
}

/// Translate a pod spec for an application.
///
/// `unit_prefix` seeds the names of derived objects (secrets, file-set
/// config maps) and is usually the application name.
pub fn make_unit_spec(app: &str, unit_prefix: &str, spec: &PodSpec) -> Result<UnitSpec> {
    let mut unit = UnitSpec::default();

    if let Some(ext) = &spec.provider_pod {
        apply_pod_extension(&mut unit.pod, ext);
    }

    let mut pull_secrets = Vec::new();
    let mut volumes: Vec<Volume> = Vec::new();

    for container_spec in &spec.containers {
        let mut container = translate_container(container_spec);

        if let Some(details) = container_spec.image.credentials() {
            let name = image_pull_secret_name(unit_prefix, &container_spec.name);
            unit.image_pull_secrets.push(ImagePullSecret {
                name: name.clone(),
                docker_config_json: secrets::docker_config_json(details)?,
            });
            pull_secrets.push(LocalObjectReference { name });
        }

        let mut mounts = Vec::new();
        for file_set in &container_spec.files {
            let config_map = file_set_config_map_name(unit_prefix, &file_set.name);
            if !volumes.iter().any(|v| v.name == file_set.name) {
                volumes.push(Volume {
                    name: file_set.name.clone(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: config_map.clone(),
                        items: Some(
                            file_set
                                .files
                                .keys()
                                .map(|file| KeyToPath {
                                    key: file.clone(),
                                    path: file.clone(),
                                    mode: None,
                                })
                                .collect(),
                        ),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
                unit.file_config_maps.push(FileConfigMap {
                    name: config_map,
                    data: file_set.files.clone(),
                });
            }
            mounts.push(VolumeMount {
                name: file_set.name.clone(),
                mount_path: file_set.mount_path.clone(),
                ..Default::default()
            });
        }
        if !mounts.is_empty() {
            container.volume_mounts = Some(mounts);
        }

        if let Some(ext) = &container_spec.provider_container {
            if ext.image_pull_policy.is_some() {
                container.image_pull_policy = ext.image_pull_policy.clone();
            }
            if ext.liveness_probe.is_some() {
                container.liveness_probe = ext.liveness_probe.clone();
            }
            if ext.readiness_probe.is_some() {
                container.readiness_probe = ext.readiness_probe.clone();
            }
        }

        unit.pod.containers.push(container);
    }

    if !pull_secrets.is_empty() {
        unit.pod.image_pull_secrets = Some(pull_secrets);
    }
    if !volumes.is_empty() {
        unit.pod.volumes = Some(volumes);
    }

    tracing::debug!(
        app,
        containers = unit.pod.containers.len(),
        pull_secrets = unit.image_pull_secrets.len(),
        "translated pod spec"
    );
    Ok(unit)
}

fn apply_pod_extension(pod: &mut NativePodSpec, ext: &KubernetesPodExtension) {
    pod.service_account_name = ext.service_account_name.clone();
    pod.restart_policy = ext.restart_policy.clone();
    pod.termination_grace_period_seconds = ext.termination_grace_period_seconds;
    pod.active_deadline_seconds = ext.active_deadline_seconds;
    pod.dns_policy = ext.dns_policy.clone();
    pod.automount_service_account_token = ext.automount_service_account_token;
    pod.security_context = ext.security_context.clone();
    pod.hostname = ext.hostname.clone();
    pod.subdomain = ext.subdomain.clone();
    pod.priority_class_name = ext.priority_class_name.clone();
    pod.priority = ext.priority;
    pod.dns_config = ext.dns_config.clone();
    pod.readiness_gates = ext.readiness_gates.clone();
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

fn translate_container(spec: &ContainerSpec) -> Container {
    let ports: Vec<ContainerPort> = spec
        .ports
        .iter()
        .map(|p| ContainerPort {
            container_port: p.container_port,
            protocol: Some(
                p.protocol
                    .clone()
                    .filter(|proto| !proto.is_empty())
                    .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            ),
            name: p.name.clone().filter(|n| !n.is_empty()),
            ..Default::default()
        })
        .collect();

    let env = env::container_env(&spec.env);

    Container {
        name: spec.name.clone(),
        image: Some(spec.image.path().to_string()),
        ports: non_empty(&ports),
        command: non_empty(&spec.command),
        args: non_empty(&spec.args),
        working_dir: spec.working_dir.clone().filter(|d| !d.is_empty()),
        env: non_empty(&env),
        ..Default::default()
    }
}
