//! Deployments and stateful sets
//!
//! An application without persistent storage runs as a deployment; one with
//! storage runs as a stateful set with a claim template per directive. In
//! both, the selector is the ownership label alone and the pod template
//! carries that label plus tags.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{object_meta, owned_labels, ownership_selector};
use crate::LABEL_APPLICATION;

/// Pod management policy for application stateful sets
pub const POD_MANAGEMENT_PARALLEL: &str = "Parallel";

fn pod_template(app: &str, pod: PodSpec, tags: &BTreeMap<String, String>) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            generate_name: Some(format!("{app}-")),
            labels: Some(owned_labels(LABEL_APPLICATION, app, tags)),
            ..Default::default()
        }),
        spec: Some(pod),
    }
}

/// Build the deployment for a stateless application
pub fn build_deployment(
    app: &str,
    namespace: &str,
    pod: PodSpec,
    replicas: i32,
    tags: &BTreeMap<String, String>,
) -> Deployment {
    Deployment {
        metadata: object_meta(app, namespace, owned_labels(LABEL_APPLICATION, app, tags)),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: ownership_selector(LABEL_APPLICATION, app),
            template: pod_template(app, pod, tags),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the stateful set for an application with per-unit storage
pub fn build_stateful_set(
    app: &str,
    namespace: &str,
    pod: PodSpec,
    replicas: i32,
    claim_templates: Vec<PersistentVolumeClaim>,
    tags: &BTreeMap<String, String>,
) -> StatefulSet {
    StatefulSet {
        metadata: object_meta(app, namespace, owned_labels(LABEL_APPLICATION, app, tags)),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: ownership_selector(LABEL_APPLICATION, app),
            service_name: app.to_string().into(),
            pod_management_policy: Some(POD_MANAGEMENT_PARALLEL.to_string()),
            template: pod_template(app, pod, tags),
            volume_claim_templates: (!claim_templates.is_empty()).then_some(claim_templates),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::storage::claim_template;
    use k8s_openapi::api::core::v1::Container;

    fn pod() -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "test".to_string(),
                image: Some("juju/image".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn tags() -> BTreeMap<String, String> {
        BTreeMap::from([("fred".to_string(), "mary".to_string())])
    }

    fn assert_selector_matches_template(
        selector: &BTreeMap<String, String>,
        template_labels: &BTreeMap<String, String>,
    ) {
        assert_eq!(selector.len(), 1);
        for (k, v) in selector {
            assert_eq!(template_labels.get(k), Some(v));
        }
    }

    /// Story: relabeling tags never breaks the deployment selector
    #[test]
    fn story_deployment_selector_pins_on_ownership_only() {
        let deployment = build_deployment("app-name", "test", pod(), 2, &tags());
        assert_eq!(deployment.metadata.name.as_deref(), Some("app-name"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("test"));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let template_meta = spec.template.metadata.unwrap();
        assert_eq!(template_meta.generate_name.as_deref(), Some("app-name-"));
        let template_labels = template_meta.labels.unwrap();
        assert_eq!(template_labels["fred"], "mary");
        assert_selector_matches_template(&spec.selector.match_labels.unwrap(), &template_labels);
    }

    #[test]
    fn stateful_set_is_parallel_with_claims() {
        let claim = claim_template("database-0", "fast", 100, BTreeMap::new());
        let set = build_stateful_set("app-name", "test", pod(), 1, vec![claim], &tags());
        let spec = set.spec.unwrap();
        assert_eq!(spec.pod_management_policy.as_deref(), Some("Parallel"));
        assert_eq!(spec.volume_claim_templates.unwrap().len(), 1);
        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_selector_matches_template(&spec.selector.match_labels.unwrap(), &template_labels);
    }
}
