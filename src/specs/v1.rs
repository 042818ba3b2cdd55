//! v1 pod spec schema
//!
//! v1 has no version field. Provider pod attributes sit inline at the top
//! level next to the common fields, custom resource definitions are a list,
//! and unknown top-level keys are ignored.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    bool_token_value, container_values, decode_extension, decode_pass, merge, strip_single_quotes,
    ContainerSpec, CustomResourceDefinitionSpec, DecodedPasses, FileSet,
    KubernetesContainerExtension, KubernetesPodExtension, PodSpec, RawContainerCommon,
    ServiceSpec, SpecVersion, NAMESPACED_SCOPE,
};
use crate::Result;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonFields {
    #[serde(default)]
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    service: Option<ServiceSpec>,
    #[serde(default)]
    custom_resource_definitions: Vec<CustomResourceDefinition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomResourceDefinition {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    version: String,
    #[serde(default = "namespaced")]
    scope: String,
    #[serde(default)]
    validation: Option<CustomResourceValidation>,
}

#[derive(Debug, Deserialize)]
struct CustomResourceValidation {
    #[serde(default)]
    properties: Map<String, Value>,
}

fn namespaced() -> String {
    NAMESPACED_SCOPE.to_string()
}

impl From<CustomResourceDefinition> for CustomResourceDefinitionSpec {
    fn from(crd: CustomResourceDefinition) -> Self {
        let schema = crd.validation.map(|v| {
            serde_json::json!({
                "type": "object",
                "properties": v.properties,
            })
        });
        Self {
            kind: crd.kind,
            group: crd.group,
            version: crd.version,
            scope: crd.scope,
            plural: None,
            singular: None,
            schema,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    #[serde(flatten)]
    common: RawContainerCommon,
    #[serde(default)]
    config: HashMap<String, Value>,
    #[serde(default)]
    files: Vec<Files>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Files {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mount_path: String,
    #[serde(default)]
    files: BTreeMap<String, String>,
}

/// Quote a boolean-like string so it survives YAML re-serialization.
///
/// Already-quoted values are normalised rather than quoted twice.
pub fn quote_bool_like(value: &str) -> Option<String> {
    let inner = strip_single_quotes(value);
    bool_token_value(inner).map(|_| format!("'{inner}'"))
}

fn guard_bool_like(config: HashMap<String, Value>) -> HashMap<String, Value> {
    config
        .into_iter()
        .map(|(key, value)| {
            let value = match &value {
                Value::String(s) => quote_bool_like(s).map(Value::String).unwrap_or(value),
                _ => value,
            };
            (key, value)
        })
        .collect()
}

fn parse_containers(doc: &Value) -> Result<Vec<ContainerSpec>> {
    container_values(doc)
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let raw: Container = decode_pass(value, &format!("containers[{i}]"))?;
            let provider_container = decode_extension::<KubernetesContainerExtension>(
                value,
                &format!("kubernetes attributes of containers[{i}]"),
            )?;

            let mut container = raw.common.into_container();
            container.env = guard_bool_like(raw.config);
            container.files = raw
                .files
                .into_iter()
                .map(|f| FileSet {
                    name: f.name,
                    mount_path: f.mount_path,
                    files: f.files,
                })
                .collect();
            container.provider_container = provider_container;
            Ok(container)
        })
        .collect()
}

/// Decode a v1 document; validation is left to the caller
pub(crate) fn parse(doc: &Value) -> Result<PodSpec> {
    let common: CommonFields = decode_pass(doc, "common pod spec fields")?;
    let provider_pod =
        decode_extension::<KubernetesPodExtension>(doc, "kubernetes pod attributes")?;
    let containers = parse_containers(doc)?;

    Ok(merge(DecodedPasses {
        common: PodSpec {
            version: SpecVersion::V1,
            config_maps: common.config_maps,
            service: common.service,
            custom_resource_definitions: common
                .custom_resource_definitions
                .into_iter()
                .map(Into::into)
                .collect(),
            ..Default::default()
        },
        provider_pod,
        containers,
        ..Default::default()
    }))
}
