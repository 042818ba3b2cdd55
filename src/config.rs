//! Broker configuration
//!
//! Values that vary per deployment of the broker rather than per
//! application: the model namespace, default storage classes, and client
//! timeouts.

use std::time::Duration;

/// Default storage class for application unit storage
pub const DEFAULT_UNIT_STORAGE_CLASS: &str = "juju-unit-storage";

/// Default storage class for operator charm storage
pub const DEFAULT_OPERATOR_STORAGE_CLASS: &str = "juju-operator-storage";

/// Number of nodes sampled for cloud/region inference
pub const DEFAULT_NODE_SAMPLE_SIZE: u32 = 5;

/// Default connect timeout for the Kubernetes client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout for the Kubernetes client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a [`crate::broker::Broker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Namespace owned by the model; every namespaced object lives here
    pub namespace: String,
    /// Storage class used when a unit storage directive names none
    pub unit_storage_class: String,
    /// Storage class used for operator charm storage when none is given
    pub operator_storage_class: String,
    /// How many nodes to list when inferring cloud regions
    pub node_sample_size: u32,
    /// Client connect timeout
    pub connect_timeout: Duration,
    /// Client read timeout
    pub read_timeout: Duration,
}

impl BrokerConfig {
    /// Create a config for the given model namespace with defaults elsewhere
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            unit_storage_class: DEFAULT_UNIT_STORAGE_CLASS.to_string(),
            operator_storage_class: DEFAULT_OPERATOR_STORAGE_CLASS.to_string(),
            node_sample_size: DEFAULT_NODE_SAMPLE_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Override the default unit storage class
    pub fn with_unit_storage_class(mut self, class: impl Into<String>) -> Self {
        self.unit_storage_class = class.into();
        self
    }

    /// Override the default operator storage class
    pub fn with_operator_storage_class(mut self, class: impl Into<String>) -> Self {
        self.operator_storage_class = class.into();
        self
    }

    /// Override the node sample size
    pub fn with_node_sample_size(mut self, size: u32) -> Self {
        self.node_sample_size = size.max(1);
        self
    }

    /// Override client timeouts
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_conventions() {
        let config = BrokerConfig::new("test");
        assert_eq!(config.namespace, "test");
        assert_eq!(config.unit_storage_class, "juju-unit-storage");
        assert_eq!(config.operator_storage_class, "juju-operator-storage");
        assert_eq!(config.node_sample_size, 5);
    }

    #[test]
    fn builders_override_fields() {
        let config = BrokerConfig::new("test")
            .with_unit_storage_class("fast")
            .with_operator_storage_class("slow")
            .with_node_sample_size(0);
        assert_eq!(config.unit_storage_class, "fast");
        assert_eq!(config.operator_storage_class, "slow");
        assert_eq!(config.node_sample_size, 1);
    }
}
