//! Operator workload
//!
//! The operator runs as a single-replica stateful set named
//! `<app>-operator`. Its agent configuration comes from the
//! `<app>-operator-config` config map and its charm directory from a
//! `charm` claim template.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, KeyToPath, PodSpec, PodTemplateSpec,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::objects::build_config_map;
use super::params::OperatorConfig;
use super::storage::claim_template;
use super::{object_meta, owned_labels, ownership_selector};
use crate::{
    operator_config_key, operator_config_map_name, operator_name, LABEL_OPERATOR, LABEL_VERSION,
    OPERATOR_CONTAINER_NAME, OPERATOR_STORAGE_NAME,
};

/// File name the agent reads its template configuration from
pub const TEMPLATE_AGENT_CONF: &str = "template-agent.conf";

/// Environment variable naming the application the operator serves
pub const APPLICATION_ENV: &str = "JUJU_APPLICATION";

fn operator_labels(
    app: &str,
    version: &str,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = owned_labels(LABEL_OPERATOR, app, tags);
    if !version.is_empty() {
        labels.insert(LABEL_VERSION.to_string(), version.to_string());
    }
    labels
}

/// Build the config map holding the operator agent configuration
pub fn build_operator_config_map(
    app: &str,
    namespace: &str,
    agent_conf: &str,
    tags: &BTreeMap<String, String>,
) -> ConfigMap {
    build_config_map(
        &operator_config_map_name(app),
        namespace,
        owned_labels(LABEL_OPERATOR, app, tags),
        BTreeMap::from([(operator_config_key(app), agent_conf.to_string())]),
    )
}

/// Pod spec for the operator container
pub fn operator_pod_spec(app: &str, agent_path: &str, image: &str) -> PodSpec {
    let config_map = operator_config_map_name(app);
    let agent_path = agent_path.trim_end_matches('/');

    PodSpec {
        containers: vec![Container {
            name: OPERATOR_CONTAINER_NAME.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(vec![EnvVar {
                name: APPLICATION_ENV.to_string(),
                value: Some(app.to_string()),
                value_from: None,
            }]),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: config_map.clone(),
                    mount_path: format!(
                        "{agent_path}/agents/application-{app}/{TEMPLATE_AGENT_CONF}"
                    ),
                    sub_path: Some(TEMPLATE_AGENT_CONF.to_string()),
                    ..Default::default()
                },
                VolumeMount {
                    name: OPERATOR_STORAGE_NAME.to_string(),
                    mount_path: format!("{agent_path}/agents"),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }],
        volumes: Some(vec![Volume {
            name: config_map.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map,
                items: Some(vec![KeyToPath {
                    key: operator_config_key(app),
                    path: TEMPLATE_AGENT_CONF.to_string(),
                    mode: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Build the operator stateful set using a resolved storage class
pub fn build_operator_stateful_set(
    app: &str,
    namespace: &str,
    agent_path: &str,
    config: &OperatorConfig,
    storage_class: &str,
) -> StatefulSet {
    let name = operator_name(app);
    let labels = operator_labels(app, &config.version, &config.resource_tags);

    let mut claim_labels = config.storage.resource_tags.clone();
    claim_labels.insert(LABEL_OPERATOR.to_string(), app.to_string());
    let charm = claim_template(
        OPERATOR_STORAGE_NAME,
        storage_class,
        config.storage.size_mib,
        claim_labels,
    );

    StatefulSet {
        metadata: object_meta(name.clone(), namespace, labels.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            selector: ownership_selector(LABEL_OPERATOR, app),
            service_name: name.into(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(operator_pod_spec(
                    app,
                    agent_path,
                    &config.operator_image_path,
                )),
            },
            volume_claim_templates: Some(vec![charm]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
