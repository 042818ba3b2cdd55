//! Cluster API boundary
//!
//! The broker talks to the cluster only through [`ResourceClient`], one
//! instance per resource kind. Production code wraps `kube::Api`; tests
//! substitute mocks and count calls.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, DeleteParams, ListParams, PostParams, PropagationPolicy, WatchEvent, WatchParams,
};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Stream of watch events for one resource kind
pub type WatchStream<K> = BoxStream<'static, Result<WatchEvent<K>>>;

/// How dependents are handled when an owner is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Propagation {
    /// Dependents are removed before the owner disappears
    #[default]
    Foreground,
    /// The owner disappears first; dependents are collected afterwards
    Background,
    /// Dependents are left behind
    Orphan,
}

impl From<Propagation> for PropagationPolicy {
    fn from(p: Propagation) -> Self {
        match p {
            Propagation::Foreground => PropagationPolicy::Foreground,
            Propagation::Background => PropagationPolicy::Background,
            Propagation::Orphan => PropagationPolicy::Orphan,
        }
    }
}

/// Selector and paging options for list, watch and collection calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Label selector, e.g. `juju-application==app`
    pub label_selector: Option<String>,
    /// Field selector, e.g. `metadata.name=test`
    pub field_selector: Option<String>,
    /// Maximum number of items to return
    pub limit: Option<u32>,
}

impl ListQuery {
    /// Query selecting on labels
    pub fn labels(selector: impl Into<String>) -> Self {
        Self {
            label_selector: Some(selector.into()),
            ..Default::default()
        }
    }

    /// Query selecting on fields
    pub fn fields(selector: impl Into<String>) -> Self {
        Self {
            field_selector: Some(selector.into()),
            ..Default::default()
        }
    }

    /// Cap the number of returned items
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn describe(&self) -> String {
        [self.label_selector.as_deref(), self.field_selector.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(",")
    }

    fn list_params(&self) -> ListParams {
        let mut lp = ListParams::default();
        if let Some(labels) = &self.label_selector {
            lp = lp.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            lp = lp.fields(fields);
        }
        if let Some(limit) = self.limit {
            lp = lp.limit(limit);
        }
        lp
    }

    fn watch_params(&self) -> WatchParams {
        let mut wp = WatchParams::default();
        if let Some(labels) = &self.label_selector {
            wp = wp.labels(labels);
        }
        if let Some(fields) = &self.field_selector {
            wp = wp.fields(fields);
        }
        wp
    }
}

/// Typed access to one resource kind, scoped to the broker's namespace
/// for namespaced kinds
///
/// Implementations report a missing object as [`Error::NotFound`] and a
/// create conflict as [`Error::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient<K: Clone + Send + Sync + 'static>: Send + Sync {
    /// Fetch an object by name
    async fn get(&self, name: &str) -> Result<K>;

    /// Create an object
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace an existing object with the given desired state
    async fn update(&self, obj: &K) -> Result<K>;

    /// Delete an object by name
    async fn delete(&self, name: &str, propagation: Propagation) -> Result<()>;

    /// Delete every object matching the query
    async fn delete_collection(&self, query: &ListQuery, propagation: Propagation) -> Result<()>;

    /// List objects matching the query
    async fn list(&self, query: &ListQuery) -> Result<Vec<K>>;

    /// Open a watch on objects matching the query
    async fn watch(&self, query: &ListQuery) -> Result<WatchStream<K>>;
}

/// [`ResourceClient`] backed by `kube::Api`
pub struct KubeResourceClient<K> {
    api: Api<K>,
}

impl<K> KubeResourceClient<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    /// Client for a namespaced kind in `namespace`
    pub fn namespaced(client: Client, namespace: &str) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    /// Client for a cluster-scoped kind
    pub fn cluster(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn classify(operation: &str, name: &str, err: kube::Error) -> Error {
        match &err {
            kube::Error::Api(e) if e.code == 404 => Error::not_found(Self::kind(), name),
            kube::Error::Api(e) if e.code == 409 && e.reason == "AlreadyExists" => {
                Error::already_exists(Self::kind(), name)
            }
            _ => Error::api(operation, Self::kind(), name, err),
        }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResourceClient<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, name: &str) -> Result<K> {
        self.api
            .get(name)
            .await
            .map_err(|e| Self::classify("get", name, e))
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify("create", &name, e))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.meta().name.clone().ok_or_else(|| {
            Error::internal_with_context("update", format!("{} has no name", Self::kind()))
        })?;
        self.api
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| Self::classify("update", &name, e))
    }

    async fn delete(&self, name: &str, propagation: Propagation) -> Result<()> {
        let dp = DeleteParams {
            propagation_policy: Some(propagation.into()),
            ..Default::default()
        };
        self.api
            .delete(name, &dp)
            .await
            .map(|_| ())
            .map_err(|e| Self::classify("delete", name, e))
    }

    async fn delete_collection(&self, query: &ListQuery, propagation: Propagation) -> Result<()> {
        let dp = DeleteParams {
            propagation_policy: Some(propagation.into()),
            ..Default::default()
        };
        self.api
            .delete_collection(&dp, &query.list_params())
            .await
            .map(|_| ())
            .map_err(|e| Self::classify("delete collection of", &query.describe(), e))
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<K>> {
        self.api
            .list(&query.list_params())
            .await
            .map(|list| list.items)
            .map_err(|e| Self::classify("list", &query.describe(), e))
    }

    async fn watch(&self, query: &ListQuery) -> Result<WatchStream<K>> {
        let selector = query.describe();
        let stream = self
            .api
            .watch(&query.watch_params(), "0")
            .await
            .map_err(|e| Self::classify("watch", &selector, e))?;
        Ok(stream
            .map_err(move |e| Self::classify("watch", &selector, e))
            .boxed())
    }
}

/// One [`ResourceClient`] per kind the broker manages
#[derive(Clone)]
pub struct ClusterApis {
    /// Namespaces
    pub namespaces: Arc<dyn ResourceClient<Namespace>>,
    /// Nodes, for cloud inference
    pub nodes: Arc<dyn ResourceClient<Node>>,
    /// Pods in the broker namespace
    pub pods: Arc<dyn ResourceClient<Pod>>,
    /// Deployments in the broker namespace
    pub deployments: Arc<dyn ResourceClient<Deployment>>,
    /// Stateful sets in the broker namespace
    pub stateful_sets: Arc<dyn ResourceClient<StatefulSet>>,
    /// Services in the broker namespace
    pub services: Arc<dyn ResourceClient<Service>>,
    /// Secrets in the broker namespace
    pub secrets: Arc<dyn ResourceClient<Secret>>,
    /// Config maps in the broker namespace
    pub config_maps: Arc<dyn ResourceClient<ConfigMap>>,
    /// Persistent volume claims in the broker namespace
    pub volume_claims: Arc<dyn ResourceClient<PersistentVolumeClaim>>,
    /// Persistent volumes
    pub volumes: Arc<dyn ResourceClient<PersistentVolume>>,
    /// Storage classes
    pub storage_classes: Arc<dyn ResourceClient<StorageClass>>,
    /// Custom resource definitions
    pub custom_resource_definitions: Arc<dyn ResourceClient<CustomResourceDefinition>>,
}

impl ClusterApis {
    /// Build clients over a live connection, scoping namespaced kinds to
    /// `namespace`
    pub fn from_client(client: Client, namespace: &str) -> Self {
        Self {
            namespaces: Arc::new(KubeResourceClient::<Namespace>::cluster(client.clone())),
            nodes: Arc::new(KubeResourceClient::<Node>::cluster(client.clone())),
            pods: Arc::new(KubeResourceClient::<Pod>::namespaced(client.clone(), namespace)),
            deployments: Arc::new(KubeResourceClient::<Deployment>::namespaced(
                client.clone(),
                namespace,
            )),
            stateful_sets: Arc::new(KubeResourceClient::<StatefulSet>::namespaced(
                client.clone(),
                namespace,
            )),
            services: Arc::new(KubeResourceClient::<Service>::namespaced(
                client.clone(),
                namespace,
            )),
            secrets: Arc::new(KubeResourceClient::<Secret>::namespaced(
                client.clone(),
                namespace,
            )),
            config_maps: Arc::new(KubeResourceClient::<ConfigMap>::namespaced(
                client.clone(),
                namespace,
            )),
            volume_claims: Arc::new(KubeResourceClient::<PersistentVolumeClaim>::namespaced(
                client.clone(),
                namespace,
            )),
            volumes: Arc::new(KubeResourceClient::<PersistentVolume>::cluster(
                client.clone(),
            )),
            storage_classes: Arc::new(KubeResourceClient::<StorageClass>::cluster(
                client.clone(),
            )),
            custom_resource_definitions: Arc::new(
                KubeResourceClient::<CustomResourceDefinition>::cluster(client),
            ),
        }
    }
}

/// Create a kube client from an optional kubeconfig path with explicit
/// timeouts; without a path the config is inferred from the environment
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {e}", path.display()),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {e}"),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {e}"))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_carries_selectors_and_limit() {
        let query = ListQuery::labels("juju-application==app").with_limit(5);
        let lp = query.list_params();
        assert_eq!(lp.label_selector.as_deref(), Some("juju-application==app"));
        assert_eq!(lp.field_selector, None);
        assert_eq!(lp.limit, Some(5));

        let wp = ListQuery::fields("metadata.name=test").watch_params();
        assert_eq!(wp.field_selector.as_deref(), Some("metadata.name=test"));
    }

    #[test]
    fn describe_joins_selectors() {
        let query = ListQuery {
            label_selector: Some("a==b".to_string()),
            field_selector: Some("metadata.name=x".to_string()),
            limit: None,
        };
        assert_eq!(query.describe(), "a==b,metadata.name=x");
        assert_eq!(ListQuery::default().describe(), "");
    }

    #[test]
    fn propagation_maps_to_kube_policy() {
        assert!(matches!(
            PropagationPolicy::from(Propagation::Foreground),
            PropagationPolicy::Foreground
        ));
        assert!(matches!(
            PropagationPolicy::from(Propagation::Orphan),
            PropagationPolicy::Orphan
        ));
    }
}
