//! Host cloud and region inference from node labels
//!
//! Managed clusters label their nodes in provider-specific ways. A node is
//! attributed to a cloud only when its markers are unambiguous: GKE needs
//! both the node-pool and OS-distribution labels, AKS and EKS need one
//! marker each. Unattributed nodes contribute nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::api::core::v1::Node;

/// GKE node pool label
pub const GKE_NODE_POOL_LABEL: &str = "cloud.google.com/gke-nodepool";
/// GKE node OS distribution label
pub const GKE_OS_DISTRIBUTION_LABEL: &str = "cloud.google.com/gke-os-distribution";
/// AKS cluster identity label
pub const AZURE_CLUSTER_LABEL: &str = "kubernetes.azure.com/cluster";
/// Label whose value names the machine manufacturer
pub const MANUFACTURER_LABEL: &str = "manufacturer";
/// Manufacturer value reported by EC2 instances
pub const AMAZON_EC2_MANUFACTURER: &str = "amazon_ec2";

/// Region labels, legacy first
pub const REGION_LABELS: [&str; 2] = [
    "failure-domain.beta.kubernetes.io/region",
    "topology.kubernetes.io/region",
];

/// A cloud recognised from node labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostCloud {
    /// Google Kubernetes Engine
    Gce,
    /// Azure Kubernetes Service
    Azure,
    /// Amazon EKS or self-managed EC2
    Ec2,
}

impl HostCloud {
    /// Cloud type name used in `cloud/region` strings
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gce => "gce",
            Self::Azure => "azure",
            Self::Ec2 => "ec2",
        }
    }

    /// Recognise the cloud a node runs on from its labels
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        if labels.contains_key(GKE_NODE_POOL_LABEL) && labels.contains_key(GKE_OS_DISTRIBUTION_LABEL)
        {
            return Some(Self::Gce);
        }
        if labels.contains_key(AZURE_CLUSTER_LABEL) {
            return Some(Self::Azure);
        }
        if labels.get(MANUFACTURER_LABEL).map(String::as_str) == Some(AMAZON_EC2_MANUFACTURER) {
            return Some(Self::Ec2);
        }
        None
    }
}

impl fmt::Display for HostCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn region(labels: &BTreeMap<String, String>) -> Option<&str> {
    REGION_LABELS
        .iter()
        .find_map(|key| labels.get(*key))
        .map(String::as_str)
        .filter(|r| !r.is_empty())
}

/// `cloud/region` for one node's labels, when both are known
pub fn cloud_region(labels: &BTreeMap<String, String>) -> Option<String> {
    let cloud = HostCloud::from_labels(labels)?;
    let region = region(labels)?;
    Some(format!("{cloud}/{region}"))
}

/// Union of `cloud/region` strings over a sample of nodes
pub fn infer_cloud_regions(nodes: &[Node]) -> BTreeSet<String> {
    nodes
        .iter()
        .filter_map(|node| node.metadata.labels.as_ref())
        .filter_map(cloud_region)
        .collect()
}
