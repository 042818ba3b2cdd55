//! Namespaces, secrets and config maps

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use super::{object_meta, owned_labels};
use crate::compiler::secrets::{DOCKER_CONFIG_JSON_KEY, DOCKER_CONFIG_JSON_TYPE};
use crate::compiler::ImagePullSecret;
use crate::specs::SecretSpec;
use crate::{Error, Result, LABEL_APPLICATION, LABEL_MODEL};

/// Secret type used when a declared secret names none
pub const OPAQUE_SECRET_TYPE: &str = "Opaque";

/// Build the model namespace, labelled with the model name
pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MODEL.to_string(),
                name.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Build the image-pull secret for a private container image
pub fn build_image_pull_secret(
    app: &str,
    namespace: &str,
    secret: &ImagePullSecret,
    tags: &BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: object_meta(
            secret.name.clone(),
            namespace,
            owned_labels(LABEL_APPLICATION, app, tags),
        ),
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(BTreeMap::from([(
            DOCKER_CONFIG_JSON_KEY.to_string(),
            ByteString(secret.docker_config_json.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Build a secret declared in the application's kubernetes resources.
///
/// `data` values arrive base64-encoded and are decoded here.
pub fn build_declared_secret(
    app: &str,
    namespace: &str,
    spec: &SecretSpec,
    tags: &BTreeMap<String, String>,
) -> Result<Secret> {
    let data = spec
        .data
        .iter()
        .map(|(key, encoded)| {
            STANDARD
                .decode(encoded.trim())
                .map(|bytes| (key.clone(), ByteString(bytes)))
                .map_err(|e| {
                    Error::validation_for_field(
                        format!("kubernetesResources.secrets[{}].data.{key}", spec.name),
                        format!("value is not base64: {e}"),
                    )
                })
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    let mut meta = object_meta(
        spec.name.clone(),
        namespace,
        owned_labels(LABEL_APPLICATION, app, tags),
    );
    if !spec.annotations.is_empty() {
        meta.annotations = Some(spec.annotations.clone());
    }

    Ok(Secret {
        metadata: meta,
        type_: Some(
            spec.type_
                .clone()
                .unwrap_or_else(|| OPAQUE_SECRET_TYPE.to_string()),
        ),
        data: (!data.is_empty()).then_some(data),
        string_data: (!spec.string_data.is_empty()).then(|| spec.string_data.clone()),
        ..Default::default()
    })
}

/// Build a config map with the given labels and data
pub fn build_config_map(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(name, namespace, labels),
        data: Some(data),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_carries_model_label() {
        let ns = build_namespace("test");
        assert_eq!(ns.metadata.labels.unwrap()["juju-model"], "test");
    }

    #[test]
    fn pull_secret_uses_docker_config_json() {
        let secret = build_image_pull_secret(
            "app-name",
            "test",
            &ImagePullSecret {
                name: "app-name-test-secret".to_string(),
                docker_config_json: "{}".to_string(),
            },
            &BTreeMap::new(),
        );
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/dockerconfigjson"));
        assert_eq!(
            secret.data.unwrap()[".dockerconfigjson"],
            ByteString(b"{}".to_vec())
        );
        assert_eq!(
            secret.metadata.labels.unwrap()["juju-application"],
            "app-name"
        );
    }

    #[test]
    fn declared_secret_decodes_data() {
        let spec = SecretSpec {
            name: "build-robot-secret".to_string(),
            data: BTreeMap::from([("username".to_string(), "YWRtaW4=".to_string())]),
            ..Default::default()
        };
        let secret = build_declared_secret("app", "test", &spec, &BTreeMap::new()).unwrap();
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(
            secret.data.unwrap()["username"],
            ByteString(b"admin".to_vec())
        );
    }

    #[test]
    fn declared_secret_rejects_bad_base64() {
        let spec = SecretSpec {
            name: "s".to_string(),
            data: BTreeMap::from([("k".to_string(), "***".to_string())]),
            ..Default::default()
        };
        assert!(build_declared_secret("app", "test", &spec, &BTreeMap::new()).is_err());
    }
}
