//! CRD installation on startup using server-side apply
//!
//! The operator installs its own CRDs so the schema served by the cluster
//! always matches the operator version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use porter_common::crd::{Installation, INSTALLATION_CRD_NAME};
use porter_common::FIELD_MANAGER;

/// CRD definition with name and resource
pub struct CrdDef {
    /// Full CRD object name (`<plural>.<group>`)
    pub name: &'static str,
    /// CRD manifest
    pub crd: CustomResourceDefinition,
}

/// CRDs owned by the operator
pub fn operator_crds() -> Vec<CrdDef> {
    vec![CrdDef {
        name: INSTALLATION_CRD_NAME,
        crd: Installation::crd(),
    }]
}

/// Install or update every operator CRD
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in operator_crds() {
        tracing::info!(crd = def.name, "Installing CRD...");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }
    tracing::info!("CRDs installed/updated");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crd_names_match_manifests() {
        for def in operator_crds() {
            assert_eq!(def.crd.metadata.name.as_deref(), Some(def.name));
        }
    }
}
