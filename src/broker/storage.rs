//! Storage classes, claims and volumes

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

use super::{delete_resource, Broker};
use crate::{image_pull_secret_name, qualified_storage_class_name, Error, Result};

impl Broker {
    /// Resolve a storage class name for this model.
    ///
    /// `<namespace>-<class>` is preferred; the bare class is used when the
    /// qualified one does not exist. Neither existing is an error.
    pub async fn resolve_storage_class(&self, storage_class: &str) -> Result<String> {
        let qualified = qualified_storage_class_name(self.namespace(), storage_class);
        for candidate in [qualified.as_str(), storage_class] {
            match self.apis.storage_classes.get(candidate).await {
                Ok(_) => {
                    debug!(storage_class = %candidate, "resolved storage class");
                    return Ok(candidate.to_string());
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        warn!(%qualified, %storage_class, "no matching storage class");
        Err(Error::not_found("StorageClass", storage_class))
    }

    /// Delete the claims mounted by `pods` and the volumes bound to them
    pub(crate) async fn delete_pod_volumes(&self, pods: &[Pod]) -> Result<()> {
        let claims = pods
            .iter()
            .filter_map(|pod| pod.spec.as_ref())
            .flat_map(|spec| spec.volumes.iter().flatten())
            .filter_map(|v| v.persistent_volume_claim.as_ref())
            .map(|claim| claim.claim_name.clone());

        for claim in claims {
            let volume = match self.apis.volume_claims.get(&claim).await {
                Ok(pvc) => pvc.spec.and_then(|s| s.volume_name),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            delete_resource(self.apis.volume_claims.as_ref(), &claim).await?;
            if let Some(volume) = volume.filter(|v| !v.is_empty()) {
                delete_resource(self.apis.volumes.as_ref(), &volume).await?;
            }
        }
        Ok(())
    }

    /// Delete the image-pull secrets synthesized for each container of `pods`
    pub(crate) async fn delete_pod_pull_secrets(&self, app: &str, pods: &[Pod]) -> Result<()> {
        for pod in pods {
            let Some(spec) = &pod.spec else { continue };
            for container in &spec.containers {
                let name = image_pull_secret_name(app, &container.name);
                debug!(pod = %pod.name_any(), secret = %name, "removing pull secret");
                delete_resource(self.apis.secrets.as_ref(), &name).await?;
            }
        }
        Ok(())
    }
}
