//! Versioned application pod specs
//!
//! A spec is decoded in three independent passes over the same document:
//! the version-common fields, the provider pod extension, and the container
//! list with each container's provider extension. The passes never share a
//! schema; [`merge`] composes their results into one [`PodSpec`].
//!
//! Schema generations are selected by the caller ([`SpecVersion`]) and never
//! sniffed from content.

pub mod v1;
pub mod v2;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{
    PodDNSConfig, PodReadinessGate, PodSecurityContext, Probe,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use serde::Deserialize;
use serde_json::Value;

use crate::{yaml, Error, Result};

/// The only custom resource definition scope accepted
pub const NAMESPACED_SCOPE: &str = "Namespaced";

/// Schema generation of a pod spec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SpecVersion {
    /// Original schema: provider pod fields inline at top level
    #[default]
    V1,
    /// Explicit `kubernetesResources` extension block
    V2,
}

impl fmt::Display for SpecVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2 => write!(f, "v2"),
        }
    }
}

impl FromStr for SpecVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "v1" => Ok(Self::V1),
            "2" | "v2" => Ok(Self::V2),
            other => Err(Error::validation(format!(
                "unsupported pod spec version {other:?}"
            ))),
        }
    }
}

/// Capability implemented by every spec fragment that can reject itself
pub trait Validate {
    /// Check structural constraints, returning a validation error on failure
    fn validate(&self) -> Result<()>;
}

// =============================================================================
// Model
// =============================================================================

/// Provider-neutral description of an application's run unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodSpec {
    /// Schema generation the spec was decoded with
    pub version: SpecVersion,
    /// Containers, in declaration order
    pub containers: Vec<ContainerSpec>,
    /// Config maps to create alongside the workload: name -> key -> value
    pub config_maps: BTreeMap<String, BTreeMap<String, String>>,
    /// Service frontend settings
    pub service: Option<ServiceSpec>,
    /// Custom resource definitions the application needs
    pub custom_resource_definitions: Vec<CustomResourceDefinitionSpec>,
    /// Provider-specific pod attributes
    pub provider_pod: Option<KubernetesPodExtension>,
    /// Provider resources introduced by the v2 schema
    pub kubernetes_resources: Option<KubernetesResources>,
}

/// One container in a pod spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    /// Container name, unique within the pod spec
    pub name: String,
    /// Image to run
    pub image: ImageReference,
    /// Exposed ports
    pub ports: Vec<ContainerPort>,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Entrypoint arguments
    pub args: Vec<String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Environment configuration; order is not significant
    pub env: HashMap<String, Value>,
    /// Files projected into the container
    pub files: Vec<FileSet>,
    /// Provider-specific container attributes
    pub provider_container: Option<KubernetesContainerExtension>,
}

/// Image to run, optionally with private registry credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    /// Bare image path
    Public(String),
    /// Image path with registry credentials
    Private(ImageDetails),
}

impl Default for ImageReference {
    fn default() -> Self {
        Self::Public(String::new())
    }
}

impl ImageReference {
    /// The image path regardless of variant
    pub fn path(&self) -> &str {
        match self {
            Self::Public(path) => path,
            Self::Private(details) => &details.image_path,
        }
    }

    /// Registry credentials, present only when a username is set
    pub fn credentials(&self) -> Option<&ImageDetails> {
        match self {
            Self::Private(details) if !details.username.is_empty() => Some(details),
            _ => None,
        }
    }
}

/// Image path plus registry credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetails {
    /// Image path, e.g. `registry.example.com/team/app:1.0`
    #[serde(alias = "path")]
    pub image_path: String,
    /// Registry username
    #[serde(default)]
    pub username: String,
    /// Registry password
    #[serde(default)]
    pub password: String,
}

/// A port exposed by a container
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port number
    pub container_port: i32,
    /// Transport protocol; TCP when unset
    #[serde(default)]
    pub protocol: Option<String>,
    /// Optional port name
    #[serde(default)]
    pub name: Option<String>,
}

/// A set of files mounted from a config map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    /// File set name, used to derive the config map name
    pub name: String,
    /// Directory the files are mounted under
    pub mount_path: String,
    /// File name -> content
    pub files: BTreeMap<String, String>,
}

/// Service frontend settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Annotations applied to the service object
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// A custom resource definition declared by an application
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomResourceDefinitionSpec {
    /// Resource kind, e.g. `TFJob`
    pub kind: String,
    /// API group, e.g. `kubeflow.org`
    pub group: String,
    /// Served and stored version
    pub version: String,
    /// Must be `Namespaced`
    pub scope: String,
    /// Explicit plural; derived from the kind when unset
    pub plural: Option<String>,
    /// Explicit singular; the lowercased kind when unset
    pub singular: Option<String>,
    /// OpenAPI v3 schema for the served version
    pub schema: Option<Value>,
}

impl CustomResourceDefinitionSpec {
    /// Plural resource name
    pub fn plural(&self) -> String {
        match &self.plural {
            Some(plural) if !plural.is_empty() => plural.clone(),
            _ => pluralize_kind(&self.kind),
        }
    }

    /// Singular resource name
    pub fn singular(&self) -> String {
        match &self.singular {
            Some(singular) if !singular.is_empty() => singular.clone(),
            _ => self.kind.to_lowercase(),
        }
    }

    /// Object name, `<plural>.<group>`
    pub fn name(&self) -> String {
        format!("{}.{}", self.plural(), self.group)
    }
}

impl Validate for CustomResourceDefinitionSpec {
    fn validate(&self) -> Result<()> {
        if self.kind.is_empty() || self.group.is_empty() || self.version.is_empty() {
            return Err(Error::validation_for_field(
                "customResourceDefinitions",
                "custom resource definition requires kind, group and version",
            ));
        }
        if self.scope != NAMESPACED_SCOPE {
            return Err(Error::validation_for_field(
                "customResourceDefinitions",
                format!(
                    "custom resource definition {:?} scope {:?} is not supported, please use {:?} scope",
                    self.name(),
                    self.scope,
                    NAMESPACED_SCOPE
                ),
            ));
        }
        Ok(())
    }
}

/// Interpret a boolean-like token (y/n, yes/no, true/false, on/off), ignoring case
pub fn bool_token_value(token: &str) -> Option<bool> {
    match token.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" | "on" => Some(true),
        "n" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// Strip one pair of enclosing single quotes, if present
pub fn strip_single_quotes(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}

/// Lowercase a kind and pluralize it with simple English rules
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Provider extensions
// =============================================================================

/// Kubernetes pod attributes a spec may set, copied 1:1 onto the pod spec
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesPodExtension {
    /// Service account the pod runs as
    #[serde(default)]
    pub service_account_name: Option<String>,
    /// `Always`, `OnFailure` or `Never`
    #[serde(default)]
    pub restart_policy: Option<String>,
    /// Grace period before a terminating pod is killed
    #[serde(default)]
    pub termination_grace_period_seconds: Option<i64>,
    /// Deadline for pod activity
    #[serde(default)]
    pub active_deadline_seconds: Option<i64>,
    /// DNS resolution policy
    #[serde(default)]
    pub dns_policy: Option<String>,
    /// Whether the service account token is mounted
    #[serde(default)]
    pub automount_service_account_token: Option<bool>,
    /// Pod security context
    #[serde(default)]
    pub security_context: Option<PodSecurityContext>,
    /// Pod hostname
    #[serde(default)]
    pub hostname: Option<String>,
    /// Pod subdomain
    #[serde(default)]
    pub subdomain: Option<String>,
    /// Priority class
    #[serde(default)]
    pub priority_class_name: Option<String>,
    /// Priority value
    #[serde(default)]
    pub priority: Option<i32>,
    /// Custom DNS configuration
    #[serde(default)]
    pub dns_config: Option<PodDNSConfig>,
    /// Extra readiness conditions
    #[serde(default)]
    pub readiness_gates: Option<Vec<PodReadinessGate>>,
}

impl KubernetesPodExtension {
    /// Whether no attribute is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Validate for KubernetesPodExtension {
    fn validate(&self) -> Result<()> {
        if let Some(policy) = &self.restart_policy {
            if !matches!(policy.as_str(), "Always" | "OnFailure" | "Never") {
                return Err(Error::validation_for_field(
                    "restartPolicy",
                    format!("restart policy {policy:?} not valid"),
                ));
            }
        }
        if let Some(policy) = &self.dns_policy {
            if !matches!(
                policy.as_str(),
                "ClusterFirst" | "ClusterFirstWithHostNet" | "Default" | "None"
            ) {
                return Err(Error::validation_for_field(
                    "dnsPolicy",
                    format!("dns policy {policy:?} not valid"),
                ));
            }
        }
        Ok(())
    }
}

/// Kubernetes container attributes that replace native sub-structures
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesContainerExtension {
    /// Liveness probe
    #[serde(default)]
    pub liveness_probe: Option<Probe>,
    /// Readiness probe
    #[serde(default)]
    pub readiness_probe: Option<Probe>,
    /// Image pull policy
    #[serde(default)]
    pub image_pull_policy: Option<String>,
}

impl KubernetesContainerExtension {
    /// Whether no attribute is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Validate for KubernetesContainerExtension {
    fn validate(&self) -> Result<()> {
        if let Some(policy) = &self.image_pull_policy {
            if !matches!(policy.as_str(), "Always" | "IfNotPresent" | "Never") {
                return Err(Error::validation_for_field(
                    "imagePullPolicy",
                    format!("image pull policy {policy:?} not valid"),
                ));
            }
        }
        Ok(())
    }
}

/// Provider resources declared in the v2 `kubernetesResources` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KubernetesResources {
    /// Secrets to create with the application
    pub secrets: Vec<SecretSpec>,
    /// Custom resource instances keyed by definition name
    pub custom_resources: BTreeMap<String, Vec<Value>>,
    /// Service accounts referenced by the application
    pub service_accounts: Vec<ServiceAccountSpec>,
}

/// A secret declared by an application
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    /// Secret name
    pub name: String,
    /// Secret type; `Opaque` when unset
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Base64-encoded values
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    /// Plain-text values
    #[serde(default)]
    pub string_data: BTreeMap<String, String>,
}

/// A service account declared by an application
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountSpec {
    /// Service account name
    #[serde(default)]
    pub name: String,
    /// Whether pods mount the account token
    #[serde(default)]
    pub automount_service_account_token: Option<bool>,
    /// RBAC rules granted to the account
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Validate for ServiceAccountSpec {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation_for_field(
                "kubernetesResources.serviceAccounts",
                "service account name is missing",
            ));
        }
        Ok(())
    }
}

impl Validate for ContainerSpec {
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation_for_field(
                "containers",
                "spec name is missing",
            ));
        }
        if self.image.path().is_empty() {
            return Err(Error::validation_for_field(
                format!("containers[{}].image", self.name),
                format!("spec image details is missing for container {:?}", self.name),
            ));
        }
        for files in &self.files {
            if files.name.is_empty() || files.mount_path.is_empty() {
                return Err(Error::validation_for_field(
                    format!("containers[{}].files", self.name),
                    "file set requires name and mount path",
                ));
            }
        }
        if let Some(ext) = &self.provider_container {
            ext.validate()?;
        }
        Ok(())
    }
}

impl Validate for PodSpec {
    fn validate(&self) -> Result<()> {
        if self.containers.is_empty() {
            return Err(Error::validation_for_field(
                "containers",
                "require at least one container spec",
            ));
        }

        let mut names = BTreeSet::new();
        for container in &self.containers {
            container.validate()?;
            if !names.insert(container.name.as_str()) {
                return Err(Error::validation_for_field(
                    "containers",
                    format!("duplicate container name {:?}", container.name),
                ));
            }
        }

        for crd in &self.custom_resource_definitions {
            crd.validate()?;
        }

        if let Some(pod) = &self.provider_pod {
            pod.validate()?;
        }

        if let Some(resources) = &self.kubernetes_resources {
            for secret in &resources.secrets {
                if secret.name.is_empty() {
                    return Err(Error::validation_for_field(
                        "kubernetesResources.secrets",
                        "secret name is missing",
                    ));
                }
            }

            let declared: BTreeSet<String> = self
                .custom_resource_definitions
                .iter()
                .map(CustomResourceDefinitionSpec::name)
                .collect();
            for (key, instances) in &resources.custom_resources {
                if !declared.contains(key) {
                    return Err(Error::validation_for_field(
                        "kubernetesResources.customResources",
                        format!("no custom resource definition found for custom resource {key:?}"),
                    ));
                }
                if instances.is_empty() {
                    return Err(Error::validation_for_field(
                        "kubernetesResources.customResources",
                        format!("empty custom resources {key:?} not valid"),
                    ));
                }
            }

            for account in &resources.service_accounts {
                account.validate()?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Fields common to containers of every schema generation
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawContainerCommon {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: Option<RawImage>,
    #[serde(default)]
    pub image_details: Option<ImageDetails>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawImage {
    Path(String),
    Details(ImageDetails),
}

impl RawContainerCommon {
    /// Build a container from the common fields; env and files are filled by the caller
    pub(crate) fn into_container(self) -> ContainerSpec {
        let image = match (self.image_details, self.image) {
            (Some(details), _) => ImageReference::Private(details),
            (None, Some(RawImage::Details(details))) => ImageReference::Private(details),
            (None, Some(RawImage::Path(path))) => ImageReference::Public(path),
            (None, None) => ImageReference::default(),
        };
        ContainerSpec {
            name: self.name,
            image,
            ports: self.ports,
            command: self.command,
            args: self.args,
            working_dir: self.working_dir,
            ..Default::default()
        }
    }
}

/// Results of the three decoding passes
#[derive(Debug, Default)]
pub(crate) struct DecodedPasses {
    pub common: PodSpec,
    pub provider_pod: Option<KubernetesPodExtension>,
    pub provider_crds: Vec<CustomResourceDefinitionSpec>,
    pub kubernetes_resources: Option<KubernetesResources>,
    pub containers: Vec<ContainerSpec>,
}

/// Compose independently decoded passes into one model.
///
/// The provider pass only fills slots the common pass leaves empty; its
/// definitions are appended after the common ones.
pub(crate) fn merge(passes: DecodedPasses) -> PodSpec {
    let DecodedPasses {
        common,
        provider_pod,
        provider_crds,
        kubernetes_resources,
        containers,
    } = passes;

    let mut custom_resource_definitions = common.custom_resource_definitions;
    custom_resource_definitions.extend(provider_crds);

    PodSpec {
        containers,
        custom_resource_definitions,
        provider_pod: common
            .provider_pod
            .or(provider_pod)
            .filter(|p| !p.is_empty()),
        kubernetes_resources: common.kubernetes_resources.or(kubernetes_resources),
        ..common
    }
}

/// Decode a provider extension from a value, treating an all-unset result as absent
pub(crate) fn decode_extension<T>(value: &Value, what: &str) -> Result<Option<T>>
where
    T: for<'de> Deserialize<'de> + Default + PartialEq,
{
    if !value.is_object() {
        return Ok(None);
    }
    let ext: T = serde_json::from_value(value.clone())
        .map_err(|e| Error::serialization(format!("decoding {what}: {e}")))?;
    Ok((ext != T::default()).then_some(ext))
}

/// Decode one pass of a document into `T`
pub(crate) fn decode_pass<T>(value: &Value, what: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(value.clone())
        .map_err(|e| Error::serialization(format!("decoding {what}: {e}")))
}

/// The raw container values of a document; absent means none
pub(crate) fn container_values(doc: &Value) -> Vec<Value> {
    doc.get("containers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Parse and validate spec text with the given schema generation
pub fn parse_pod_spec(text: &str, version: SpecVersion) -> Result<PodSpec> {
    let doc = yaml::parse_document(text)?;
    if !doc.is_object() {
        return Err(Error::validation("pod spec must be a mapping"));
    }

    let spec = match version {
        SpecVersion::V1 => v1::parse(&doc)?,
        SpecVersion::V2 => v2::parse(&doc)?,
    };
    spec.validate()?;
    Ok(spec)
}
