//! Unit and operator status derived from pods

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

/// Lifecycle state reported for a unit or operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Pod accepted but not yet running
    Allocating,
    /// Pod running
    Running,
    /// Pod ran to completion
    Terminated,
    /// Pod failed
    Error,
    /// Phase missing or unrecognised
    Unknown,
}

impl UnitStatus {
    /// Map a pod phase onto a unit status
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Allocating,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Terminated,
            Some("Failed") => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allocating => "allocating",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One application unit, backed by a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Unit {
    /// Pod UID
    pub id: String,
    /// Pod name
    pub name: String,
    /// Pod IP, once assigned
    pub address: Option<String>,
    /// Exposed ports as `<port>/<protocol>`
    pub ports: Vec<String>,
    /// Whether the pod is being deleted
    pub dying: bool,
    /// Status from the pod phase
    pub status: UnitStatus,
    /// Human-readable detail
    pub message: String,
}

/// The operator pod's identity and state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorStatus {
    /// Pod UID
    pub id: String,
    /// Whether the pod is being deleted
    pub dying: bool,
    /// Status from the pod phase
    pub status: UnitStatus,
    /// Human-readable detail
    pub message: String,
}

fn status_message(pod: &Pod) -> String {
    let Some(status) = &pod.status else {
        return String::new();
    };
    if let Some(message) = status.message.as_deref().filter(|m| !m.is_empty()) {
        return message.to_string();
    }
    // A waiting container explains a stuck pod better than the phase does
    let waiting = status
        .container_statuses
        .iter()
        .flatten()
        .filter_map(|cs| cs.state.as_ref()?.waiting.as_ref())
        .find_map(|w| w.message.clone().or_else(|| w.reason.clone()));
    waiting
        .or_else(|| status.reason.clone())
        .unwrap_or_default()
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

impl From<&Pod> for Unit {
    fn from(pod: &Pod) -> Self {
        let ports = pod
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .flat_map(|c| c.ports.iter().flatten())
            .map(|p| {
                format!(
                    "{}/{}",
                    p.container_port,
                    p.protocol.as_deref().unwrap_or("TCP")
                )
            })
            .collect();

        Unit {
            id: pod.metadata.uid.clone().unwrap_or_default(),
            name: pod.metadata.name.clone().unwrap_or_default(),
            address: pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty()),
            ports,
            dying: pod.metadata.deletion_timestamp.is_some(),
            status: UnitStatus::from_phase(pod_phase(pod)),
            message: status_message(pod),
        }
    }
}

impl From<&Pod> for OperatorStatus {
    fn from(pod: &Pod) -> Self {
        OperatorStatus {
            id: pod.metadata.uid.clone().unwrap_or_default(),
            dying: pod.metadata.deletion_timestamp.is_some(),
            status: UnitStatus::from_phase(pod_phase(pod)),
            message: status_message(pod),
        }
    }
}
