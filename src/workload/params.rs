//! Inputs to the workload builders and broker ensure operations

use std::collections::BTreeMap;

use crate::specs::PodSpec;

/// Application config key selecting the service type
pub const SERVICE_TYPE_KEY: &str = "kubernetes-service-type";
/// Application config key for a load balancer IP
pub const SERVICE_LOAD_BALANCER_IP_KEY: &str = "kubernetes-service-loadbalancer-ip";
/// Application config key for an external name
pub const SERVICE_EXTERNAL_NAME_KEY: &str = "kubernetes-service-externalname";
/// Application config key for comma-separated external IPs
pub const SERVICE_EXTERNAL_IPS_KEY: &str = "kubernetes-service-externalips";
/// Application config key for comma-separated `k=v` service annotations
pub const SERVICE_ANNOTATIONS_KEY: &str = "kubernetes-service-annotations";

/// Service type used when the application config names none
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";

/// Resource constraints applied to every container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraints {
    /// Memory limit in MiB
    pub mem_mib: Option<u64>,
    /// CPU limit in millicores
    pub cpu_power: Option<u64>,
}

/// A device (accelerator) request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceParams {
    /// Extended resource name, e.g. `nvidia.com/gpu`
    pub device_type: String,
    /// Number of devices per unit
    pub count: i64,
    /// Device attributes; `gpu` selects the node accelerator
    pub attributes: BTreeMap<String, String>,
}

/// Persistent storage requested for each unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemParams {
    /// Storage directive name
    pub storage_name: String,
    /// Requested size in MiB
    pub size_mib: u64,
    /// Storage class; the configured default when unset
    pub storage_class: Option<String>,
    /// Where the volume is mounted in the first container
    pub attachment_path: String,
    /// Extra labels for the claim
    pub resource_tags: BTreeMap<String, String>,
}

/// Everything `ensure_service` needs to realize an application
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceParams {
    /// Pod spec; when absent, ensure only rescales the existing workload
    pub pod_spec: Option<PodSpec>,
    /// Labels added to every object next to the ownership label
    pub resource_tags: BTreeMap<String, String>,
    /// Placement directive, `key=value[,key=value]`
    pub placement: Option<String>,
    /// Resource constraints
    pub constraints: Constraints,
    /// Per-unit persistent storage; non-empty selects a stateful set
    pub filesystems: Vec<FilesystemParams>,
    /// Device requests
    pub devices: Vec<DeviceParams>,
}

/// Application configuration attributes relevant to the service object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    attributes: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Wrap raw application config attributes
    pub fn new(attributes: BTreeMap<String, String>) -> Self {
        Self { attributes }
    }

    /// Set one attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Service type
    pub fn service_type(&self) -> &str {
        self.get(SERVICE_TYPE_KEY).unwrap_or(DEFAULT_SERVICE_TYPE)
    }

    /// Load balancer IP
    pub fn load_balancer_ip(&self) -> Option<&str> {
        self.get(SERVICE_LOAD_BALANCER_IP_KEY)
    }

    /// External name
    pub fn external_name(&self) -> Option<&str> {
        self.get(SERVICE_EXTERNAL_NAME_KEY)
    }

    /// External IPs
    pub fn external_ips(&self) -> Vec<String> {
        self.get(SERVICE_EXTERNAL_IPS_KEY)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Service annotations
    pub fn annotations(&self) -> BTreeMap<String, String> {
        self.get(SERVICE_ANNOTATIONS_KEY)
            .map(parse_key_values)
            .unwrap_or_default()
    }
}

/// Parse `k=v[,k=v]` into a map, skipping malformed entries
pub fn parse_key_values(input: &str) -> BTreeMap<String, String> {
    input
        .split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            (!k.is_empty()).then(|| (k.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Storage for the operator's charm directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorStorage {
    /// Storage class; the configured operator default when unset
    pub storage_class: Option<String>,
    /// Size in MiB
    pub size_mib: u64,
    /// Extra labels for the claim
    pub resource_tags: BTreeMap<String, String>,
}

/// Everything `ensure_operator` needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Operator image
    pub operator_image_path: String,
    /// Agent version, recorded in the `juju-version` label
    pub version: String,
    /// Agent configuration; when absent the config map must already exist
    pub agent_conf: Option<String>,
    /// Charm storage
    pub storage: OperatorStorage,
    /// Labels added to every operator object
    pub resource_tags: BTreeMap<String, String>,
}
