//! Reconciliation broker
//!
//! Keeps cluster objects converged with the desired state derived from an
//! application's pod spec and parameters, and tears them down again.
//!
//! # Ensure protocol
//!
//! Every ensure submits a freshly built object as an update. If the update
//! fails because the object does not exist, the same object is created.
//! Other failures surface unchanged; nothing here retries. Custom resource
//! definitions are the exception: the API rejects an update without a
//! resource version, so their ensure reads the current version first (see
//! [`crd`]).
//!
//! # Delete protocol
//!
//! Deletes use foreground propagation and treat "not found" as success, so
//! every teardown can be re-invoked after a partial failure.

pub mod application;
pub mod client;
pub mod crd;
pub mod namespace;
pub mod operator;
pub mod status;
pub mod storage;

use std::collections::BTreeSet;
use std::path::Path;

use kube::{Resource, ResourceExt};
use tracing::{debug, info};

pub use client::{
    create_client_with_timeout, ClusterApis, KubeResourceClient, ListQuery, Propagation,
    ResourceClient, WatchStream,
};
pub use status::{OperatorStatus, Unit, UnitStatus};

use crate::cloud::infer_cloud_regions;
use crate::config::BrokerConfig;
use crate::Result;

/// Broker bound to one model namespace
#[derive(Clone)]
pub struct Broker {
    config: BrokerConfig,
    apis: ClusterApis,
}

impl Broker {
    /// Create a broker over existing cluster clients
    pub fn new(config: BrokerConfig, apis: ClusterApis) -> Self {
        Self { config, apis }
    }

    /// Connect to the cluster named by `kubeconfig` (or the inferred
    /// environment) using the configured timeouts
    pub async fn connect(config: BrokerConfig, kubeconfig: Option<&Path>) -> Result<Self> {
        let client =
            create_client_with_timeout(kubeconfig, config.connect_timeout, config.read_timeout)
                .await?;
        let apis = ClusterApis::from_client(client, &config.namespace);
        info!(namespace = %config.namespace, "connected to cluster");
        Ok(Self::new(config, apis))
    }

    /// The model namespace this broker manages
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// `cloud/region` strings inferred from a small sample of nodes
    pub async fn list_host_cloud_regions(&self) -> Result<BTreeSet<String>> {
        let query = ListQuery::default().with_limit(self.config.node_sample_size);
        let nodes = self.apis.nodes.list(&query).await?;
        let regions = infer_cloud_regions(&nodes);
        debug!(sampled = nodes.len(), ?regions, "inferred host cloud regions");
        Ok(regions)
    }
}

/// Update `obj`, creating it if it does not exist yet
pub(crate) async fn ensure_resource<K>(client: &dyn ResourceClient<K>, obj: &K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    let kind = K::kind(&());
    let name = obj.name_any();
    match client.update(obj).await {
        Ok(_) => {
            debug!(%kind, %name, "updated");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            client.create(obj).await?;
            info!(%kind, %name, "created");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete `name` with foreground propagation; a missing object is success
pub(crate) async fn delete_resource<K>(client: &dyn ResourceClient<K>, name: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    match client.delete(name, Propagation::Foreground).await {
        Ok(()) => {
            info!(kind = %K::kind(&()), %name, "deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            debug!(kind = %K::kind(&()), %name, "already absent");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Delete everything matching `selector`; nothing matching is success
pub(crate) async fn delete_labelled<K>(client: &dyn ResourceClient<K>, selector: &str) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    match client
        .delete_collection(&ListQuery::labels(selector), Propagation::Foreground)
        .await
    {
        Ok(()) => {
            info!(kind = %K::kind(&()), %selector, "deleted collection");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}


#[cfg(test)]
mod tests {
    use super::client::MockResourceClient;
    use super::*;
    use crate::Error;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Story: the first ensure creates, the second only updates
    ///
    /// Both calls succeed and the object is created exactly once.
    #[tokio::test]
    async fn test_ensure_twice_creates_once() {
        let mut mock = MockResourceClient::<Secret>::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s: &Secret| Err(Error::not_found("Secret", s.name_any())));
        mock.expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s: &Secret| Ok(s.clone()));
        mock.expect_update()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|s: &Secret| Ok(s.clone()));

        let desired = secret("app-secret");
        ensure_resource(&mock, &desired).await.unwrap();
        ensure_resource(&mock, &desired).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_surfaces_other_update_failures() {
        let mut mock = MockResourceClient::<Secret>::new();
        mock.expect_update()
            .returning(|_| Err(Error::internal_with_context("update", "connection refused")));
        mock.expect_create().never();

        let err = ensure_resource(&mock, &secret("s")).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_ensure_surfaces_create_failure_after_not_found() {
        let mut mock = MockResourceClient::<Secret>::new();
        mock.expect_update()
            .returning(|_| Err(Error::not_found("Secret", "s")));
        mock.expect_create()
            .returning(|_| Err(Error::already_exists("Secret", "s")));

        let err = ensure_resource(&mock, &secret("s")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    /// Story: deleting something that is already gone is success
    #[tokio::test]
    async fn test_delete_missing_object_succeeds() {
        let mut mock = MockResourceClient::<Secret>::new();
        mock.expect_delete()
            .withf(|name: &str, propagation: &Propagation| {
                name == "gone" && *propagation == Propagation::Foreground
            })
            .times(2)
            .returning(|name, _| Err(Error::not_found("Secret", name)));

        delete_resource(&mock, "gone").await.unwrap();
        delete_resource(&mock, "gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_surfaces_other_failures() {
        let mut mock = MockResourceClient::<Secret>::new();
        mock.expect_delete()
            .returning(|_, _| Err(Error::internal_with_context("delete", "forbidden")));

        assert!(delete_resource(&mock, "s").await.is_err());
    }

    #[tokio::test]
    async fn test_host_cloud_regions_sample_nodes() {
        use k8s_openapi::api::core::v1::Node;
        use std::collections::BTreeMap;

        let mut mocks = testing::MockApis::new();
        mocks
            .nodes
            .expect_list()
            .withf(|q: &ListQuery| q.limit == Some(5))
            .times(1)
            .returning(|_| {
                Ok(vec![Node {
                    metadata: ObjectMeta {
                        labels: Some(BTreeMap::from([
                            ("manufacturer".to_string(), "amazon_ec2".to_string()),
                            (
                                "failure-domain.beta.kubernetes.io/region".to_string(),
                                "us-east-1".to_string(),
                            ),
                        ])),
                        ..Default::default()
                    },
                    ..Default::default()
                }])
            });

        let regions = mocks.into_broker().list_host_cloud_regions().await.unwrap();
        assert_eq!(regions, BTreeSet::from(["ec2/us-east-1".to_string()]));
    }

    #[tokio::test]
    async fn test_delete_labelled_uses_selector() {
        let mut mock = MockResourceClient::<Secret>::new();
        mock.expect_delete_collection()
            .withf(|query: &ListQuery, _: &Propagation| {
                query.label_selector.as_deref() == Some("juju-application==app")
            })
            .times(1)
            .returning(|_, _| Err(Error::not_found("Secret", "juju-application==app")));

        delete_labelled(&mock, "juju-application==app").await.unwrap();
    }
}
