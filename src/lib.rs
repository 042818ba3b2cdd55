//! kubebroker - Kubernetes resource reconciliation broker
//!
//! Realizes provider-neutral application specifications as native cluster
//! objects, keeps them converged with ensure semantics, and tears them down
//! on removal.
//!
//! # Modules
//!
//! - [`specs`] - Versioned pod spec parsing and validation (v1, v2)
//! - [`compiler`] - Translation of abstract pod specs into native pod specs
//! - [`workload`] - Pure builders for deployments, stateful sets, services, etc.
//! - [`broker`] - Ensure/delete reconciliation against the cluster API
//! - [`cloud`] - Cloud and region inference from node labels
//! - [`config`] - Broker configuration
//! - [`telemetry`] - Logging initialisation
//! - [`yaml`] - YAML/JSON decoding into `serde_json::Value`
//! - [`error`] - Error types

#![warn(missing_docs)]

pub mod broker;
pub mod cloud;
pub mod compiler;
pub mod config;
pub mod error;
pub mod specs;
pub mod telemetry;
pub mod workload;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels
// =============================================================================
// Every owned object carries one of the ownership labels below. Builders and
// the broker's delete path select on them, so they must agree exactly.

/// Ownership label for application workloads
pub const LABEL_APPLICATION: &str = "juju-application";

/// Ownership label for operator workloads
pub const LABEL_OPERATOR: &str = "juju-operator";

/// Label tying cluster-scoped objects (storage classes) to a model namespace
pub const LABEL_MODEL: &str = "juju-model";

/// Label naming the storage directive a claim template belongs to
pub const LABEL_STORAGE: &str = "juju-storage";

/// Label carrying the agent version on operator objects
pub const LABEL_VERSION: &str = "juju-version";

// =============================================================================
// Naming conventions
// =============================================================================

/// Suffix appended to an application name to form its operator name
pub const OPERATOR_SUFFIX: &str = "-operator";

/// Suffix appended to an application name to form its operator config map
pub const OPERATOR_CONFIG_SUFFIX: &str = "-operator-config";

/// Suffix of the application-level configurations config map
pub const CONFIGURATIONS_CONFIG_SUFFIX: &str = "-configurations-config";

/// Container name used in the operator pod
pub const OPERATOR_CONTAINER_NAME: &str = "juju-operator";

/// Claim template and volume name holding operator charm state
pub const OPERATOR_STORAGE_NAME: &str = "charm";

/// Name of the operator stateful set for an application
pub fn operator_name(app: &str) -> String {
    format!("{app}{OPERATOR_SUFFIX}")
}

/// Name of the operator agent config map for an application
pub fn operator_config_map_name(app: &str) -> String {
    format!("{app}{OPERATOR_CONFIG_SUFFIX}")
}

/// Key inside the operator config map holding the agent configuration
pub fn operator_config_key(app: &str) -> String {
    format!("{app}-agent.conf")
}

/// Name of the image-pull secret synthesized for a container
pub fn image_pull_secret_name(app: &str, container: &str) -> String {
    format!("{app}-{container}-secret")
}

/// Name of a persistent volume claim template for a storage directive
pub fn claim_template_name(storage: &str, ordinal: usize) -> String {
    format!("{storage}-{ordinal}")
}

/// Name of a file-set config map mounted into an application container
pub fn file_set_config_map_name(app: &str, file_set: &str) -> String {
    format!("{app}-{file_set}-config")
}

/// Namespace-qualified storage class name, tried before the bare name
pub fn qualified_storage_class_name(namespace: &str, storage_class: &str) -> String {
    format!("{namespace}-{storage_class}")
}

/// Label selector matching an application's objects
pub fn application_selector(app: &str) -> String {
    format!("{LABEL_APPLICATION}=={app}")
}

/// Label selector matching an operator's objects
pub fn operator_selector(app: &str) -> String {
    format!("{LABEL_OPERATOR}=={app}")
}

/// Label selector matching cluster-scoped objects belonging to a model
pub fn model_selector(namespace: &str) -> String {
    format!("{LABEL_MODEL}=={namespace}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_conventions() {
        assert_eq!(operator_name("gitlab"), "gitlab-operator");
        assert_eq!(operator_config_map_name("gitlab"), "gitlab-operator-config");
        assert_eq!(operator_config_key("gitlab"), "gitlab-agent.conf");
        assert_eq!(image_pull_secret_name("app", "web"), "app-web-secret");
        assert_eq!(claim_template_name("database", 0), "database-0");
        assert_eq!(qualified_storage_class_name("test", "fast"), "test-fast");
    }

    #[test]
    fn selectors_use_equality_form() {
        assert_eq!(application_selector("app"), "juju-application==app");
        assert_eq!(operator_selector("app"), "juju-operator==app");
        assert_eq!(model_selector("test"), "juju-model==test");
    }
}
