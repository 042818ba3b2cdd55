//! Custom resource definitions
//!
//! The API server refuses to replace a definition without a resource
//! version, so ensure reads the current object first and carries its
//! version into the update. A concurrent writer then fails the update with
//! a conflict instead of being silently overwritten.

use std::collections::BTreeMap;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{delete_labelled, Broker};
use crate::specs::PodSpec;
use crate::workload::crd::build_custom_resource_definition;
use crate::{application_selector, Result};

impl Broker {
    /// Ensure every definition declared by `spec` exists and matches it.
    ///
    /// Returns the definition names in declaration order.
    #[instrument(skip(self, spec))]
    pub async fn ensure_custom_resource_definitions(
        &self,
        app: &str,
        spec: &PodSpec,
    ) -> Result<Vec<String>> {
        let tags = BTreeMap::new();
        let mut names = Vec::with_capacity(spec.custom_resource_definitions.len());
        for declared in &spec.custom_resource_definitions {
            let desired = build_custom_resource_definition(app, declared, &tags)?;
            names.push(self.ensure_custom_resource_definition(desired).await?);
        }
        Ok(names)
    }

    pub(crate) async fn ensure_custom_resource_definition(
        &self,
        mut desired: CustomResourceDefinition,
    ) -> Result<String> {
        let crds = self.apis.custom_resource_definitions.as_ref();
        let name = desired.name_any();
        match crds.get(&name).await {
            Ok(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version;
                crds.update(&desired).await?;
                debug!(crd = %name, "updated custom resource definition");
            }
            Err(e) if e.is_not_found() => {
                crds.create(&desired).await?;
                info!(crd = %name, "created custom resource definition");
            }
            Err(e) => return Err(e),
        }
        Ok(name)
    }

    /// Delete the definitions owned by `app`
    #[instrument(skip(self))]
    pub async fn delete_custom_resource_definitions(&self, app: &str) -> Result<()> {
        delete_labelled(
            self.apis.custom_resource_definitions.as_ref(),
            &application_selector(app),
        )
        .await
    }
}
