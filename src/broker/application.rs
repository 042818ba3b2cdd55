//! Application (service) lifecycle

use tracing::{debug, info, instrument};

use super::client::ListQuery;
use super::status::Unit;
use super::{delete_labelled, delete_resource, ensure_resource, Broker};
use crate::specs::Validate;
use crate::workload::params::{ServiceConfig, ServiceParams};
use crate::workload::render::{render_objects, UnitClaim, Workload};
use crate::workload::storage::claim_template;
use crate::{
    application_selector, claim_template_name, model_selector, Error, Result, LABEL_APPLICATION,
    LABEL_STORAGE,
};

impl Broker {
    /// Ensure `app` runs `units` units as described by `params`.
    ///
    /// Objects are submitted in dependency order: pull secrets, config
    /// maps, declared secrets, custom resource definitions, the workload
    /// and finally the service. Storage classes are resolved before any of
    /// them. Without a pod spec only the replica count of the existing
    /// workload changes.
    #[instrument(skip(self, params, config), fields(namespace = %self.namespace()))]
    pub async fn ensure_service(
        &self,
        app: &str,
        params: &ServiceParams,
        units: i32,
        config: &ServiceConfig,
    ) -> Result<()> {
        let Some(spec) = &params.pod_spec else {
            return self.scale_workload(app, units).await;
        };
        spec.validate()?;

        let claims = self.unit_claims(app, params).await?;
        let objects = render_objects(app, self.namespace(), spec, params, units, config, claims)?;

        self.ensure_namespace().await?;
        for secret in &objects.image_pull_secrets {
            ensure_resource(self.apis.secrets.as_ref(), secret).await?;
        }
        for config_map in &objects.config_maps {
            ensure_resource(self.apis.config_maps.as_ref(), config_map).await?;
        }
        for secret in &objects.secrets {
            ensure_resource(self.apis.secrets.as_ref(), secret).await?;
        }
        for crd in objects.custom_resource_definitions {
            self.ensure_custom_resource_definition(crd).await?;
        }
        match &objects.workload {
            Workload::Deployment(deployment) => {
                ensure_resource(self.apis.deployments.as_ref(), deployment).await?
            }
            Workload::StatefulSet(set) => {
                ensure_resource(self.apis.stateful_sets.as_ref(), set).await?
            }
        }
        if let Some(service) = &objects.service {
            ensure_resource(self.apis.services.as_ref(), service).await?;
        }

        info!(app = %app, units, "application ensured");
        Ok(())
    }

    /// Claim templates and their mount points, one per filesystem
    async fn unit_claims(&self, app: &str, params: &ServiceParams) -> Result<Vec<UnitClaim>> {
        let mut claims = Vec::with_capacity(params.filesystems.len());
        for (ordinal, fs) in params.filesystems.iter().enumerate() {
            let requested = fs
                .storage_class
                .as_deref()
                .unwrap_or(&self.config.unit_storage_class);
            let storage_class = self.resolve_storage_class(requested).await?;

            let name = claim_template_name(&fs.storage_name, ordinal);
            let mut labels = fs.resource_tags.clone();
            labels.insert(LABEL_STORAGE.to_string(), fs.storage_name.clone());
            labels.insert(LABEL_APPLICATION.to_string(), app.to_string());

            claims.push(UnitClaim {
                template: claim_template(&name, &storage_class, fs.size_mib, labels),
                mount_path: fs.attachment_path.clone(),
            });
        }
        Ok(claims)
    }

    async fn scale_workload(&self, app: &str, units: i32) -> Result<()> {
        match self.apis.stateful_sets.get(app).await {
            Ok(mut set) => {
                set.spec.get_or_insert_with(Default::default).replicas = Some(units);
                self.apis.stateful_sets.update(&set).await?;
                info!(app = %app, units, "scaled stateful set");
                return Ok(());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.apis.deployments.get(app).await {
            Ok(mut deployment) => {
                deployment.spec.get_or_insert_with(Default::default).replicas = Some(units);
                self.apis.deployments.update(&deployment).await?;
                info!(app = %app, units, "scaled deployment");
                Ok(())
            }
            Err(e) if e.is_not_found() && units == 0 => {
                debug!(app = %app, "no workload to scale down");
                Ok(())
            }
            Err(e) if e.is_not_found() => Err(Error::not_found("workload for application", app)),
            Err(e) => Err(e),
        }
    }

    /// Remove `app` and everything it owns.
    ///
    /// Order: workload, service, claims and volumes mounted by the
    /// application's pods, owned secrets and config maps, then the model's
    /// storage classes.
    #[instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn delete_service(&self, app: &str) -> Result<()> {
        delete_resource(self.apis.stateful_sets.as_ref(), app).await?;
        delete_resource(self.apis.deployments.as_ref(), app).await?;
        delete_resource(self.apis.services.as_ref(), app).await?;

        let pods = self
            .apis
            .pods
            .list(&ListQuery::labels(application_selector(app)))
            .await?;
        self.delete_pod_volumes(&pods).await?;

        let selector = application_selector(app);
        delete_labelled(self.apis.secrets.as_ref(), &selector).await?;
        delete_labelled(self.apis.config_maps.as_ref(), &selector).await?;
        delete_labelled(
            self.apis.storage_classes.as_ref(),
            &model_selector(self.namespace()),
        )
        .await?;

        info!(app = %app, "application deleted");
        Ok(())
    }

    /// Units of `app`, one per pod
    pub async fn units(&self, app: &str) -> Result<Vec<Unit>> {
        let pods = self
            .apis
            .pods
            .list(&ListQuery::labels(application_selector(app)))
            .await?;
        Ok(pods.iter().map(Unit::from).collect())
    }
}
