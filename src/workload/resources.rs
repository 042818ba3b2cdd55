//! Resource requirements and scheduling
//!
//! Device requests and constraint-derived limits are projected onto the same
//! `ResourceRequirements`, keyed by resource name, so they compose.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::params::{parse_key_values, Constraints, DeviceParams};

/// Node label selecting an accelerator model
pub const ACCELERATOR_LABEL: &str = "accelerator";

/// Device attribute naming the GPU model
pub const GPU_ATTRIBUTE: &str = "gpu";

/// Build the resource requirements for constraints and devices
pub fn resource_requirements(
    constraints: &Constraints,
    devices: &[DeviceParams],
) -> Option<ResourceRequirements> {
    let mut limits = BTreeMap::new();
    let mut requests = BTreeMap::new();

    for device in devices.iter().filter(|d| d.count > 0) {
        let quantity = Quantity(device.count.to_string());
        limits.insert(device.device_type.clone(), quantity.clone());
        requests.insert(device.device_type.clone(), quantity);
    }

    if let Some(mem) = constraints.mem_mib {
        limits.insert("memory".to_string(), Quantity(format!("{mem}Mi")));
    }
    if let Some(cpu) = constraints.cpu_power {
        limits.insert("cpu".to_string(), Quantity(format!("{cpu}m")));
    }

    if limits.is_empty() && requests.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: (!limits.is_empty()).then_some(limits),
        requests: (!requests.is_empty()).then_some(requests),
        ..Default::default()
    })
}

/// Node selector entries from placement and device attributes
pub fn node_selector(
    placement: Option<&str>,
    devices: &[DeviceParams],
) -> BTreeMap<String, String> {
    let mut selector = placement.map(parse_key_values).unwrap_or_default();
    for device in devices {
        if let Some(model) = device.attributes.get(GPU_ATTRIBUTE) {
            selector.insert(ACCELERATOR_LABEL.to_string(), model.clone());
        }
    }
    selector
}

/// Apply constraints, devices and placement to every container of a pod
pub fn apply_scheduling(
    pod: &mut PodSpec,
    placement: Option<&str>,
    constraints: &Constraints,
    devices: &[DeviceParams],
) {
    if let Some(requirements) = resource_requirements(constraints, devices) {
        for container in &mut pod.containers {
            let existing = container.resources.get_or_insert_with(Default::default);
            if let Some(limits) = &requirements.limits {
                existing
                    .limits
                    .get_or_insert_with(Default::default)
                    .extend(limits.clone());
            }
            if let Some(requests) = &requirements.requests {
                existing
                    .requests
                    .get_or_insert_with(Default::default)
                    .extend(requests.clone());
            }
        }
    }

    let selector = node_selector(placement, devices);
    if !selector.is_empty() {
        pod.node_selector
            .get_or_insert_with(Default::default)
            .extend(selector);
    }
}
