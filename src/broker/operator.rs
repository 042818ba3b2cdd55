//! Operator lifecycle

use tracing::{info, instrument};

use super::client::ListQuery;
use super::status::OperatorStatus;
use super::{delete_resource, ensure_resource, Broker};
use crate::workload::operator::{build_operator_config_map, build_operator_stateful_set};
use crate::workload::params::OperatorConfig;
use crate::{
    operator_config_map_name, operator_name, operator_selector, Error, Result,
    CONFIGURATIONS_CONFIG_SUFFIX,
};

impl Broker {
    /// Ensure the operator for `app` is deployed.
    ///
    /// Without an agent configuration the operator config map must already
    /// exist; it is never created empty.
    #[instrument(skip(self, agent_path, config), fields(namespace = %self.namespace()))]
    pub async fn ensure_operator(
        &self,
        app: &str,
        agent_path: &str,
        config: &OperatorConfig,
    ) -> Result<()> {
        self.ensure_namespace().await?;

        match &config.agent_conf {
            Some(agent_conf) => {
                let config_map = build_operator_config_map(
                    app,
                    self.namespace(),
                    agent_conf,
                    &config.resource_tags,
                );
                ensure_resource(self.apis.config_maps.as_ref(), &config_map).await?;
            }
            None => {
                if let Err(e) = self
                    .apis
                    .config_maps
                    .get(&operator_config_map_name(app))
                    .await
                {
                    return Err(if e.is_not_found() {
                        Error::internal_with_context(
                            "ensure_operator",
                            format!("config map for {app:?} should already exist: {e}"),
                        )
                    } else {
                        e
                    });
                }
            }
        }

        let storage_class = config
            .storage
            .storage_class
            .as_deref()
            .unwrap_or(&self.config.operator_storage_class);
        let storage_class = self.resolve_storage_class(storage_class).await?;

        let stateful_set =
            build_operator_stateful_set(app, self.namespace(), agent_path, config, &storage_class);
        ensure_resource(self.apis.stateful_sets.as_ref(), &stateful_set).await?;
        info!(app = %app, "operator ensured");
        Ok(())
    }

    /// Status of the operator pod for `app`
    pub async fn operator(&self, app: &str) -> Result<OperatorStatus> {
        let pods = self
            .apis
            .pods
            .list(&ListQuery::labels(operator_selector(app)))
            .await?;
        pods.first()
            .map(OperatorStatus::from)
            .ok_or_else(|| Error::not_found("operator pod for application", app))
    }

    /// Remove the operator for `app` and everything it owns
    #[instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn delete_operator(&self, app: &str) -> Result<()> {
        let config_maps = self.apis.config_maps.as_ref();
        delete_resource(config_maps, &operator_config_map_name(app)).await?;
        delete_resource(config_maps, &format!("{app}{CONFIGURATIONS_CONFIG_SUFFIX}")).await?;

        let name = operator_name(app);
        delete_resource(self.apis.stateful_sets.as_ref(), &name).await?;

        let pods = self
            .apis
            .pods
            .list(&ListQuery::labels(operator_selector(app)))
            .await?;
        self.delete_pod_pull_secrets(app, &pods).await?;
        self.delete_pod_volumes(&pods).await?;

        // Older releases ran the operator as a deployment
        delete_resource(self.apis.deployments.as_ref(), &name).await?;

        info!(app = %app, pods = pods.len(), "operator deleted");
        Ok(())
    }
}
