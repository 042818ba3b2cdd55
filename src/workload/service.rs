//! Service objects

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PodSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::params::ServiceConfig;
use super::{object_meta, owned_labels, selector_labels};
use crate::LABEL_APPLICATION;

/// Service ports for every container port in the pod.
///
/// A named port is targeted by name, an unnamed one by number.
pub fn service_ports(pod: &PodSpec) -> Vec<ServicePort> {
    pod.containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .map(|p| ServicePort {
            port: p.container_port,
            target_port: Some(match &p.name {
                Some(name) => IntOrString::String(name.clone()),
                None => IntOrString::Int(p.container_port),
            }),
            protocol: p.protocol.clone(),
            name: p.name.clone(),
            ..Default::default()
        })
        .collect()
}

/// Build the service fronting an application
pub fn build_service(
    app: &str,
    namespace: &str,
    pod: &PodSpec,
    config: &ServiceConfig,
    annotations: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
) -> Service {
    let mut meta = object_meta(app, namespace, owned_labels(LABEL_APPLICATION, app, tags));

    let mut all_annotations = annotations.clone();
    all_annotations.extend(config.annotations());
    if !all_annotations.is_empty() {
        meta.annotations = Some(all_annotations);
    }

    let external_ips = config.external_ips();
    Service {
        metadata: meta,
        spec: Some(ServiceSpec {
            selector: Some(selector_labels(LABEL_APPLICATION, app)),
            type_: Some(config.service_type().to_string()),
            ports: Some(service_ports(pod)),
            load_balancer_ip: config.load_balancer_ip().map(str::to_string),
            external_name: config.external_name().map(str::to_string),
            external_ips: (!external_ips.is_empty()).then_some(external_ips),
            ..Default::default()
        }),
        ..Default::default()
    }
}
