//! Every object an application's pod spec renders to
//!
//! `ensure_service` submits these and the `render` command prints them, so
//! both go through [`render_objects`].

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::Serialize;
use serde_json::Value;

use super::apps::{build_deployment, build_stateful_set};
use super::crd::build_custom_resource_definition;
use super::objects::{build_config_map, build_declared_secret, build_image_pull_secret};
use super::owned_labels;
use super::params::{ServiceConfig, ServiceParams};
use super::resources::apply_scheduling;
use super::service::{build_service, service_ports};
use super::storage::mount_claims;
use crate::compiler::make_unit_spec;
use crate::specs::PodSpec;
use crate::{Error, Result, LABEL_APPLICATION};

/// A per-unit claim template and where the first container mounts it
#[derive(Debug, Clone, PartialEq)]
pub struct UnitClaim {
    /// Claim template; its name doubles as the volume name
    pub template: PersistentVolumeClaim,
    /// Mount path inside the container
    pub mount_path: String,
}

/// The workload controller running the application's units
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// Stateless application
    Deployment(Deployment),
    /// Application with per-unit storage
    StatefulSet(StatefulSet),
}

/// Objects for one application, in submission order
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObjects {
    /// Image-pull secrets for private images
    pub image_pull_secrets: Vec<Secret>,
    /// File-set config maps followed by declared config maps
    pub config_maps: Vec<ConfigMap>,
    /// Secrets declared under kubernetes resources
    pub secrets: Vec<Secret>,
    /// Declared custom resource definitions
    pub custom_resource_definitions: Vec<CustomResourceDefinition>,
    /// Deployment or stateful set
    pub workload: Workload,
    /// Service, when any container exposes a port
    pub service: Option<Service>,
}

impl RenderedObjects {
    /// All objects as JSON manifests, in submission order
    pub fn manifests(&self) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        push_all(&mut out, &self.image_pull_secrets)?;
        push_all(&mut out, &self.config_maps)?;
        push_all(&mut out, &self.secrets)?;
        push_all(&mut out, &self.custom_resource_definitions)?;
        match &self.workload {
            Workload::Deployment(d) => push_all(&mut out, std::slice::from_ref(d))?,
            Workload::StatefulSet(s) => push_all(&mut out, std::slice::from_ref(s))?,
        }
        push_all(&mut out, self.service.as_slice())?;
        Ok(out)
    }
}

fn push_all<T: Serialize>(out: &mut Vec<Value>, objects: &[T]) -> Result<()> {
    for object in objects {
        out.push(
            serde_json::to_value(object)
                .map_err(|e| Error::serialization(format!("encoding manifest: {e}")))?,
        );
    }
    Ok(())
}

/// Render every object `spec` needs for `units` units of `app`.
///
/// Non-empty `claims` select a stateful set; otherwise the workload is a
/// deployment. Nothing here touches the cluster, so a spec that cannot be
/// rendered fails before anything is submitted.
pub fn render_objects(
    app: &str,
    namespace: &str,
    spec: &PodSpec,
    params: &ServiceParams,
    units: i32,
    config: &ServiceConfig,
    claims: Vec<UnitClaim>,
) -> Result<RenderedObjects> {
    let tags = &params.resource_tags;
    let mut unit = make_unit_spec(app, app, spec)?;

    let image_pull_secrets = unit
        .image_pull_secrets
        .iter()
        .map(|secret| build_image_pull_secret(app, namespace, secret, tags))
        .collect();

    let file_maps = unit
        .file_config_maps
        .iter()
        .map(|cm| (cm.name.as_str(), &cm.data));
    let declared_maps = spec.config_maps.iter().map(|(n, d)| (n.as_str(), d));
    let config_maps = file_maps
        .chain(declared_maps)
        .map(|(name, data)| {
            build_config_map(
                name,
                namespace,
                owned_labels(LABEL_APPLICATION, app, tags),
                data.clone(),
            )
        })
        .collect();

    let secrets = spec
        .kubernetes_resources
        .iter()
        .flat_map(|resources| &resources.secrets)
        .map(|declared| build_declared_secret(app, namespace, declared, tags))
        .collect::<Result<Vec<_>>>()?;

    let custom_resource_definitions = spec
        .custom_resource_definitions
        .iter()
        .map(|declared| build_custom_resource_definition(app, declared, tags))
        .collect::<Result<Vec<_>>>()?;

    apply_scheduling(
        &mut unit.pod,
        params.placement.as_deref(),
        &params.constraints,
        &params.devices,
    );

    let service = (!service_ports(&unit.pod).is_empty()).then(|| {
        let annotations = spec
            .service
            .as_ref()
            .map(|s| s.annotations.clone())
            .unwrap_or_default();
        build_service(app, namespace, &unit.pod, config, &annotations, tags)
    });

    let workload = if claims.is_empty() {
        Workload::Deployment(build_deployment(app, namespace, unit.pod, units, tags))
    } else {
        let mounts: Vec<(String, String)> = claims
            .iter()
            .map(|c| {
                (
                    c.template.metadata.name.clone().unwrap_or_default(),
                    c.mount_path.clone(),
                )
            })
            .collect();
        mount_claims(&mut unit.pod, &mounts);
        let templates = claims.into_iter().map(|c| c.template).collect();
        Workload::StatefulSet(build_stateful_set(
            app, namespace, unit.pod, units, templates, tags,
        ))
    };

    Ok(RenderedObjects {
        image_pull_secrets,
        config_maps,
        secrets,
        custom_resource_definitions,
        workload,
        service,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::specs::{parse_pod_spec, SpecVersion};
    use crate::workload::storage::claim_template;

    const SPEC: &str = r#"
version: 2
containers:
  - name: web
    image:
      path: registry.example.com/web:1
      username: robot
      password: hunter2
    ports:
      - containerPort: 80
configMaps:
  settings:
    mode: fast
kubernetesResources:
  secrets:
    - name: token
      stringData:
        token: abc
"#;

    fn params() -> ServiceParams {
        ServiceParams {
            pod_spec: Some(parse_pod_spec(SPEC, SpecVersion::V2).unwrap()),
            resource_tags: BTreeMap::from([("team".to_string(), "web".to_string())]),
            ..Default::default()
        }
    }

    fn kinds(objects: &RenderedObjects) -> Vec<String> {
        objects
            .manifests()
            .unwrap()
            .iter()
            .map(|m| m["kind"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Story: manifests come out in the order they are submitted
    #[test]
    fn story_manifests_follow_submission_order() {
        let params = params();
        let spec = params.pod_spec.clone().unwrap();
        let objects =
            render_objects("web", "model", &spec, &params, 2, &ServiceConfig::default(), vec![])
                .unwrap();

        assert_eq!(
            kinds(&objects),
            ["Secret", "ConfigMap", "Secret", "Deployment", "Service"]
        );
        assert_eq!(
            objects.image_pull_secrets[0].metadata.name.as_deref(),
            Some("web-web-secret")
        );
        assert_eq!(objects.config_maps[0].metadata.labels.as_ref().unwrap()["team"], "web");
    }

    #[test]
    fn claims_select_a_stateful_set_with_mounts() {
        let params = params();
        let spec = params.pod_spec.clone().unwrap();
        let claims = vec![UnitClaim {
            template: claim_template("data-0", "fast", 512, BTreeMap::new()),
            mount_path: "/srv/data".to_string(),
        }];

        let objects =
            render_objects("web", "model", &spec, &params, 1, &ServiceConfig::default(), claims)
                .unwrap();
        let Workload::StatefulSet(set) = &objects.workload else {
            panic!("expected a stateful set");
        };
        let set_spec = set.spec.as_ref().unwrap();
        assert_eq!(set_spec.volume_claim_templates.as_ref().unwrap().len(), 1);
        let mounts = set_spec.template.spec.as_ref().unwrap().containers[0]
            .volume_mounts
            .clone()
            .unwrap();
        assert!(mounts
            .iter()
            .any(|m| m.name == "data-0" && m.mount_path == "/srv/data"));
    }

    #[test]
    fn portless_pod_has_no_service() {
        let spec = parse_pod_spec("containers:\n  - name: job\n    image: busybox\n", SpecVersion::V1)
            .unwrap();
        let objects = render_objects(
            "job",
            "model",
            &spec,
            &ServiceParams::default(),
            1,
            &ServiceConfig::default(),
            vec![],
        )
        .unwrap();
        assert!(objects.service.is_none());
        assert_eq!(kinds(&objects), ["Deployment"]);
    }
}
