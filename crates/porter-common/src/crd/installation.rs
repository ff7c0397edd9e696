//! Installation CRD types
//!
//! An `Installation` declares a bundle to run (`reference`), the action to
//! perform on it, and the parameters for the run. The installation
//! controller turns each revision of an Installation into exactly one
//! execution Job.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the Installation CRD
pub const INSTALLATION_API_GROUP: &str = "porter.sh";

/// API version of the Installation CRD
pub const INSTALLATION_API_VERSION: &str = "v1";

/// Full name of the Installation CRD object
pub const INSTALLATION_CRD_NAME: &str = "installations.porter.sh";

/// Desired state of a bundle installation
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "porter.sh",
    version = "v1",
    kind = "Installation",
    plural = "installations",
    shortname = "inst",
    namespaced,
    status = "InstallationStatus",
    printcolumn = r#"{"name":"Reference","type":"string","jsonPath":".spec.reference"}"#,
    printcolumn = r#"{"name":"Action","type":"string","jsonPath":".spec.action"}"#,
    printcolumn = r#"{"name":"Active Job","type":"string","jsonPath":".status.activeJob.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Reference to the bundle in an OCI registry, e.g. getporter/porter-hello:v0.1.1
    pub reference: String,

    /// Action defined in the bundle to execute (install, upgrade, uninstall or a custom action)
    pub action: String,

    /// Version of the Porter executor image. Defaults to "latest".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub porter_version: Option<String>,

    /// Service account the execution job runs as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Credential set names passed to the executor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credential_sets: Vec<String>,

    /// Parameter set names passed to the executor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_sets: Vec<String>,

    /// Literal parameter values passed to the executor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    /// Size of the scratch volume used to share outputs with the bundle (Kubernetes quantity).
    /// Defaults to 128Mi.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs_volume_size: Option<String>,
}

/// Reference to an execution Job in the Installation's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct JobReference {
    /// Job name
    pub name: String,
}

impl JobReference {
    /// Create a reference to the named job
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Observed state of an Installation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Job running the current revision, if it has not finished yet
    #[serde(default)]
    pub active_job: Option<JobReference>,

    /// Most recent job that finished or was superseded
    #[serde(default)]
    pub last_job: Option<JobReference>,
}

impl Installation {
    /// `namespace/name` key used in logs and errors
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Opaque token identifying the current desired-state revision.
    ///
    /// Uses `metadata.generation`, which the API server only bumps on spec
    /// changes, so status writes never produce a new revision. Falls back to
    /// `resourceVersion` for stores that do not track generations.
    pub fn revision_token(&self) -> Option<String> {
        self.metadata
            .generation
            .map(|g| g.to_string())
            .or_else(|| self.metadata.resource_version.clone())
            .filter(|r| !r.is_empty())
    }

    /// Name of the job recorded as active in status, if any
    pub fn active_job_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.active_job.as_ref())
            .map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample_spec() -> InstallationSpec {
        InstallationSpec {
            reference: "example.com/wordpress-bundle:v1".to_string(),
            action: "install".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn spec_deserializes_camel_case_fields() {
        let json = serde_json::json!({
            "reference": "getporter/hello:v0.1.1",
            "action": "upgrade",
            "porterVersion": "v1.0.0",
            "serviceAccount": "installer",
            "credentialSets": ["azure"],
            "parameterSets": ["prod"],
            "parameters": {"replicas": "3"},
            "outputsVolumeSize": "64Mi"
        });
        let spec: InstallationSpec = serde_json::from_value(json).unwrap();

        assert_eq!(spec.action, "upgrade");
        assert_eq!(spec.porter_version.as_deref(), Some("v1.0.0"));
        assert_eq!(spec.service_account.as_deref(), Some("installer"));
        assert_eq!(spec.credential_sets, vec!["azure"]);
        assert_eq!(spec.parameter_sets, vec!["prod"]);
        assert_eq!(spec.parameters.get("replicas").map(String::as_str), Some("3"));
        assert_eq!(spec.outputs_volume_size.as_deref(), Some("64Mi"));
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let json = serde_json::json!({"reference": "r", "action": "install"});
        let spec: InstallationSpec = serde_json::from_value(json).unwrap();
        assert!(spec.porter_version.is_none());
        assert!(spec.credential_sets.is_empty());
        assert!(spec.parameters.is_empty());
    }

    #[test]
    fn crd_is_namespaced_under_porter_group() {
        let crd = Installation::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some(INSTALLATION_CRD_NAME));
        assert_eq!(crd.spec.group, INSTALLATION_API_GROUP);
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.versions[0].name, INSTALLATION_API_VERSION);
        assert!(crd.spec.versions[0]
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }

    #[test]
    fn crd_renders_as_yaml() {
        let yaml = serde_yaml::to_string(&Installation::crd()).unwrap();
        assert!(yaml.contains("kind: Installation"));
        assert!(yaml.contains("outputsVolumeSize"));
    }

    #[test]
    fn revision_prefers_generation() {
        let mut inst = Installation::new("wordpress", sample_spec());
        inst.metadata.generation = Some(5);
        inst.metadata.resource_version = Some("81234".to_string());
        assert_eq!(inst.revision_token().as_deref(), Some("5"));
    }

    #[test]
    fn revision_falls_back_to_resource_version() {
        let mut inst = Installation::new("wordpress", sample_spec());
        inst.metadata.resource_version = Some("81234".to_string());
        assert_eq!(inst.revision_token().as_deref(), Some("81234"));

        inst.metadata.resource_version = None;
        assert_eq!(inst.revision_token(), None);
    }

    #[test]
    fn key_and_active_job() {
        let mut inst = Installation::new("wordpress", sample_spec());
        inst.metadata.namespace = Some("apps".to_string());
        assert_eq!(inst.key(), "apps/wordpress");
        assert_eq!(inst.active_job_name(), None);

        inst.status = Some(InstallationStatus {
            active_job: Some(JobReference::new("wordpress-4")),
            last_job: None,
        });
        assert_eq!(inst.active_job_name(), Some("wordpress-4"));
    }

    #[test]
    fn status_serializes_job_references() {
        let status = InstallationStatus {
            active_job: Some(JobReference::new("wordpress-5")),
            last_job: Some(JobReference::new("wordpress-4")),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["activeJob"]["name"], "wordpress-5");
        assert_eq!(json["lastJob"]["name"], "wordpress-4");
    }
}
