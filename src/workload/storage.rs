//! Persistent volume claim templates

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Access mode of every claim template
pub const READ_WRITE_ONCE: &str = "ReadWriteOnce";

/// Build a claim template requesting `size_mib` from a storage class
pub fn claim_template(
    name: &str,
    storage_class: &str,
    size_mib: u64,
    labels: BTreeMap<String, String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(storage_class.to_string()),
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(format!("{size_mib}Mi")),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mount each claim template into the first container at its path
pub fn mount_claims(pod: &mut PodSpec, mounts: &[(String, String)]) {
    let Some(container) = pod.containers.first_mut() else {
        return;
    };
    let volume_mounts = container.volume_mounts.get_or_insert_with(Vec::new);
    for (claim, path) in mounts {
        volume_mounts.push(VolumeMount {
            name: claim.clone(),
            mount_path: path.clone(),
            ..Default::default()
        });
    }
}
