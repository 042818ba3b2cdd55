//! v2 pod spec schema
//!
//! v2 carries an explicit `version: 2` and moves every provider attribute
//! under `kubernetesResources`. Container environment is `envConfig` and
//! file projection is `volumeConfig`. Unknown top-level keys are rejected.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;

use super::{
    container_values, decode_extension, decode_pass, merge, ContainerSpec,
    CustomResourceDefinitionSpec, DecodedPasses, FileSet, KubernetesContainerExtension,
    KubernetesPodExtension, KubernetesResources, PodSpec, RawContainerCommon, SecretSpec,
    ServiceAccountSpec, ServiceSpec, SpecVersion,
};
use crate::{Error, Result};

/// Top-level keys understood by at least one v2 pass
pub const KNOWN_KEYS: &[&str] = &[
    "version",
    "containers",
    "configMaps",
    "service",
    "kubernetesResources",
];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommonFields {
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    service: Option<ServiceSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderFields {
    #[serde(default)]
    kubernetes_resources: Option<RawKubernetesResources>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawKubernetesResources {
    #[serde(default)]
    pod: Option<KubernetesPodExtension>,
    #[serde(default)]
    secrets: Vec<SecretSpec>,
    #[serde(default)]
    custom_resource_definitions: BTreeMap<String, CustomResourceDefinition>,
    #[serde(default)]
    custom_resources: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    service_accounts: Vec<ServiceAccountSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomResourceDefinition {
    #[serde(default)]
    group: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    versions: Vec<DefinitionVersion>,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    names: DefinitionNames,
    #[serde(default)]
    validation: Option<DefinitionValidation>,
}

#[derive(Debug, Deserialize)]
struct DefinitionVersion {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionNames {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    plural: Option<String>,
    #[serde(default)]
    singular: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DefinitionValidation {
    #[serde(rename = "openAPIV3Schema")]
    open_api_v3_schema: Option<Value>,
}

impl CustomResourceDefinition {
    fn into_spec(self, key: &str) -> Result<CustomResourceDefinitionSpec> {
        let version = self
            .version
            .or_else(|| self.versions.into_iter().next().map(|v| v.name))
            .unwrap_or_default();
        let spec = CustomResourceDefinitionSpec {
            kind: self.names.kind,
            group: self.group,
            version,
            scope: self.scope,
            plural: self.names.plural,
            singular: self.names.singular,
            schema: self.validation.and_then(|v| v.open_api_v3_schema),
        };
        if spec.name() != key {
            return Err(Error::validation_for_field(
                "kubernetesResources.customResourceDefinitions",
                format!(
                    "custom resource definition {key:?} does not match its names, expected {:?}",
                    spec.name()
                ),
            ));
        }
        Ok(spec)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    #[serde(flatten)]
    common: RawContainerCommon,
    #[serde(default)]
    env_config: HashMap<String, Value>,
    #[serde(default)]
    volume_config: Vec<VolumeConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    mount_path: String,
    #[serde(default)]
    files: Vec<FileContent>,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    path: String,
    #[serde(default)]
    content: String,
}

fn check_known_keys(doc: &Value) -> Result<()> {
    if let Some(map) = doc.as_object() {
        if let Some(key) = map.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            return Err(Error::validation_for_field(
                key.clone(),
                format!("unknown field {key:?} in v2 pod spec"),
            ));
        }
    }
    Ok(())
}

fn check_version(version: Option<&Value>) -> Result<()> {
    let ok = match version {
        None => true,
        Some(Value::Number(n)) => n.as_u64() == Some(2),
        Some(Value::String(s)) => matches!(s.as_str(), "2" | "v2"),
        Some(_) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            "version",
            format!("pod spec version {} is not 2", version.unwrap_or(&Value::Null)),
        ))
    }
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
            container.env = raw.env_config;
            container.files = raw
                .volume_config
                .into_iter()
                .map(|v| FileSet {
                    name: v.name,
                    mount_path: v.mount_path,
                    files: v.files.into_iter().map(|f| (f.path, f.content)).collect(),
                })
                .collect();
            container.provider_container = provider_container;
            Ok(container)
        })
        .collect()
}

/// Decode a v2 document; validation is left to the caller
pub(crate) fn parse(doc: &Value) -> Result<PodSpec> {
    check_known_keys(doc)?;

    let common: CommonFields = decode_pass(doc, "common pod spec fields")?;
    check_version(common.version.as_ref())?;

    let provider: ProviderFields = decode_pass(doc, "kubernetes resources")?;
    let containers = parse_containers(doc)?;

    let mut passes = DecodedPasses {
        common: PodSpec {
            version: SpecVersion::V2,
            config_maps: common.config_maps,
            service: common.service,
            ..Default::default()
        },
        containers,
        ..Default::default()
    };

    if let Some(resources) = provider.kubernetes_resources {
        passes.provider_pod = resources.pod;
        passes.provider_crds = resources
            .custom_resource_definitions
            .into_iter()
            .map(|(key, crd)| crd.into_spec(&key))
            .collect::<Result<_>>()?;
        passes.kubernetes_resources = Some(KubernetesResources {
            secrets: resources.secrets,
            custom_resources: resources.custom_resources,
            service_accounts: resources.service_accounts,
        });
    }

    Ok(merge(passes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specs::parse_pod_spec;

    const SPEC: &str = r#"
version: 2
containers:
  - name: gitlab
    image: gitlab/latest
    imagePullPolicy: Always
    ports:
    - containerPort: 80
      name: fred
      protocol: TCP
    envConfig:
      attr: foo=bar
      restricted: 'yes'
      switch: on
      brackets: '["hello", "world"]'
    volumeConfig:
      - name: configuration
        mountPath: /var/lib/foo
        files:
          - path: file1
            content: |
              [config]
              foo: bar
  - name: secret-image-user
    image:
      path: staging.registry.org/testing/testing-image@sha256:deed-beef
      username: docker-registry
      password: hunter2
configMaps:
  mydata:
    foo: bar
kubernetesResources:
  pod:
    restartPolicy: OnFailure
    dnsPolicy: ClusterFirstWithHostNet
  secrets:
    - name: build-robot-secret
      type: Opaque
      stringData:
        config.yaml: |-
          apiUrl: "https://my.api.com/api/v1"
  customResourceDefinitions:
    tfjobs.kubeflow.org:
      group: kubeflow.org
      scope: Namespaced
      names:
        kind: TFJob
        singular: tfjob
        plural: tfjobs
      version: v1
      validation:
        openAPIV3Schema:
          type: object
          properties:
            tfReplicaSpecs:
              type: object
  customResources:
    tfjobs.kubeflow.org:
      - apiVersion: "kubeflow.org/v1"
        kind: "TFJob"
        metadata:
          name: "dist-mnist-for-e2e-test"
        spec: {}
  serviceAccounts:
    - name: build-robot
      automountServiceAccountToken: true
      rules:
        - apiGroups: [""]
          resources: ["pods"]
          verbs: ["get", "watch", "list"]
"#;

    /// Story: a full v2 spec decodes the kubernetesResources block
    ///
    /// The pod extension, secrets, definitions, instances and service
    /// accounts all come from the provider pass and are merged next to the
    /// common fields.
    #[test]
    fn story_full_v2_spec_merges_kubernetes_resources() {
        let spec = parse_pod_spec(SPEC, SpecVersion::V2).unwrap();
        assert_eq!(spec.version, SpecVersion::V2);
        assert_eq!(spec.containers.len(), 2);

        let pod = spec.provider_pod.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));

        let gitlab = &spec.containers[0];
        assert_eq!(gitlab.env["restricted"], "yes");
        assert_eq!(gitlab.env["switch"], true);
        assert_eq!(gitlab.files[0].files["file1"], "[config]\nfoo: bar\n");
        assert_eq!(
            gitlab
                .provider_container
                .as_ref()
                .and_then(|c| c.image_pull_policy.as_deref()),
            Some("Always")
        );

        assert_eq!(
            spec.containers[1].image.credentials().unwrap().password,
            "hunter2"
        );

        let crd = &spec.custom_resource_definitions[0];
        assert_eq!(crd.name(), "tfjobs.kubeflow.org");
        assert_eq!(crd.version, "v1");
        assert_eq!(crd.schema.as_ref().unwrap()["type"], "object");

        let resources = spec.kubernetes_resources.as_ref().unwrap();
        assert_eq!(resources.secrets[0].name, "build-robot-secret");
        assert_eq!(resources.custom_resources["tfjobs.kubeflow.org"].len(), 1);
        assert_eq!(resources.service_accounts[0].name, "build-robot");
        assert_eq!(resources.service_accounts[0].rules[0].verbs.len(), 3);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let text = "version: 2\nomitServiceFrontend: true\ncontainers:\n  - name: web\n    image: nginx\n";
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("unknown field \"omitServiceFrontend\""));
    }

    #[test]
    fn inline_pod_attributes_are_not_v2() {
        let text = "restartPolicy: Always\ncontainers:\n  - name: web\n    image: nginx\n";
        assert!(parse_pod_spec(text, SpecVersion::V2).is_err());
        assert!(parse_pod_spec(text, SpecVersion::V1).is_ok());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let text = "version: 3\ncontainers:\n  - name: web\n    image: nginx\n";
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("version 3 is not 2"));
    }

    #[test]
    fn undeclared_custom_resource_is_rejected() {
        let text = r#"
containers:
  - name: web
    image: nginx
kubernetesResources:
  customResources:
    tfjobs.kubeflow.org:
      - kind: TFJob
"#;
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err
            .to_string()
            .contains("no custom resource definition found for custom resource \"tfjobs.kubeflow.org\""));
    }

    #[test]
    fn empty_custom_resource_list_is_rejected() {
        let text = r#"
containers:
  - name: web
    image: nginx
kubernetesResources:
  customResourceDefinitions:
    tfjobs.kubeflow.org:
      group: kubeflow.org
      version: v1
      scope: Namespaced
      names:
        kind: TFJob
  customResources:
    tfjobs.kubeflow.org: []
"#;
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("empty custom resources"));
    }

    #[test]
    fn cluster_scoped_definition_is_rejected() {
        let text = r#"
containers:
  - name: web
    image: nginx
kubernetesResources:
  customResourceDefinitions:
    tfjobs.kubeflow.org:
      group: kubeflow.org
      version: v1
      scope: Cluster
      names:
        kind: TFJob
"#;
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("is not supported"));
    }

    #[test]
    fn definition_key_must_match_names() {
        let text = r#"
containers:
  - name: web
    image: nginx
kubernetesResources:
  customResourceDefinitions:
    jobs.example.com:
      group: kubeflow.org
      version: v1
      scope: Namespaced
      names:
        kind: TFJob
"#;
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("expected \"tfjobs.kubeflow.org\""));
    }

    #[test]
    fn nameless_service_account_is_rejected() {
        let text = r#"
containers:
  - name: web
    image: nginx
kubernetesResources:
  serviceAccounts:
    - automountServiceAccountToken: true
"#;
        let err = parse_pod_spec(text, SpecVersion::V2).unwrap_err();
        assert!(err.to_string().contains("service account name is missing"));
    }
}
