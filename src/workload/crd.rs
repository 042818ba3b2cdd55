//! Custom resource definitions (apiextensions.k8s.io/v1)

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionSpec,
    CustomResourceDefinitionVersion, CustomResourceValidation, JSONSchemaProps,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::owned_labels;
use crate::specs::CustomResourceDefinitionSpec as DeclaredDefinition;
use crate::{Error, Result, LABEL_APPLICATION};

fn open_schema() -> JSONSchemaProps {
    JSONSchemaProps {
        type_: Some("object".to_string()),
        x_kubernetes_preserve_unknown_fields: Some(true),
        ..Default::default()
    }
}

/// Build the definition object for a declared custom resource definition.
///
/// Definitions without a schema accept any object.
pub fn build_custom_resource_definition(
    app: &str,
    declared: &DeclaredDefinition,
    tags: &BTreeMap<String, String>,
) -> Result<CustomResourceDefinition> {
    let name = declared.name();
    let schema = match &declared.schema {
        Some(value) => serde_json::from_value::<JSONSchemaProps>(value.clone()).map_err(|e| {
            Error::validation_for_field(
                "customResourceDefinitions",
                format!("invalid schema for custom resource definition {name:?}: {e}"),
            )
        })?,
        None => open_schema(),
    };

    Ok(CustomResourceDefinition {
        metadata: ObjectMeta {
            name: Some(name),
            labels: Some(owned_labels(LABEL_APPLICATION, app, tags)),
            ..Default::default()
        },
        spec: CustomResourceDefinitionSpec {
            group: declared.group.clone(),
            scope: declared.scope.clone(),
            names: CustomResourceDefinitionNames {
                kind: declared.kind.clone(),
                plural: declared.plural(),
                singular: Some(declared.singular()),
                ..Default::default()
            },
            versions: vec![CustomResourceDefinitionVersion {
                name: declared.version.clone(),
                served: true,
                storage: true,
                schema: Some(CustomResourceValidation {
                    open_api_v3_schema: Some(schema),
                }),
                ..Default::default()
            }],
            ..Default::default()
        },
        ..Default::default()
    })
}
