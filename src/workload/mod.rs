//! Resource builders
//!
//! Pure functions that assemble native cluster objects from translated
//! specs. Ensure re-derives every object on each call, so builders must be
//! deterministic: same inputs, byte-identical objects.
//!
//! Every owned object carries the ownership label of its application or
//! operator plus caller-supplied tags. Workload selectors pin on the
//! ownership label alone.

pub mod apps;
pub mod crd;
pub mod objects;
pub mod operator;
pub mod params;
pub mod render;
pub mod resources;
pub mod service;
pub mod storage;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

pub use params::{
    Constraints, DeviceParams, FilesystemParams, OperatorConfig, OperatorStorage, ServiceConfig,
    ServiceParams,
};

/// Labels for an owned object: tags plus the ownership label, which tags never override
pub fn owned_labels(
    owner_key: &str,
    owner: &str,
    tags: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = tags.clone();
    labels.insert(owner_key.to_string(), owner.to_string());
    labels
}

/// Selector labels: the ownership label alone
pub fn selector_labels(owner_key: &str, owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(owner_key.to_string(), owner.to_string())])
}

/// Label selector pinned on the ownership label
pub fn ownership_selector(owner_key: &str, owner: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(owner_key, owner)),
        ..Default::default()
    }
}

/// Metadata for a namespaced object
pub fn object_meta(
    name: impl Into<String>,
    namespace: &str,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}
