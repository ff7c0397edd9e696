//! Kubernetes client helpers
//!
//! Reads treat 404 as absence and creates treat `AlreadyExists` as success,
//! which is all the reconciler needs to stay idempotent under duplicate
//! triggers.

use std::fmt::Debug;
use std::path::PathBuf;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients; must exceed the watch timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of an idempotent create
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same name already existed; nothing was changed
    AlreadyExisted,
}

/// True if the error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True if the error is an API 409 `AlreadyExists` (as opposed to a write conflict)
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Create an object, treating "already exists" as success
pub async fn create_if_absent<K>(api: &Api<K>, name: &str, obj: &K) -> Result<CreateOutcome, Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(e) if is_already_exists(&e) => {
            debug!(name = %name, "object already exists, treating create as no-op");
            Ok(CreateOutcome::AlreadyExisted)
        }
        Err(e) => Err(e.into()),
    }
}

/// Get an object by name, mapping 404 to `None`
pub async fn get_optional<K>(api: &Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Merge-patch the status subresource of a namespaced resource.
///
/// Fields serialized as `null` are removed from the stored status.
pub async fn patch_resource_status<K>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl Serialize,
    field_manager: &str,
) -> Result<(), Error>
where
    K: kube::Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Debug,
    <K as kube::Resource>::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let params = PatchParams {
        field_manager: Some(field_manager.to_string()),
        ..Default::default()
    };
    api.patch_status(
        name,
        &params,
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// How to reach the API server
#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// Explicit kubeconfig file; `None` infers in-cluster or default config
    pub kubeconfig: Option<PathBuf>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-request read timeout
    pub read_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ClientSettings {
    /// Use the given kubeconfig file with default timeouts
    pub fn with_kubeconfig(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            ..Default::default()
        }
    }

    /// Load client configuration and build a client
    pub async fn connect(&self) -> Result<Client, Error> {
        let mut config = self.load_config().await?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);
        Client::try_from(config).map_err(|e| Error::client(format!("building client: {}", e)))
    }

    async fn load_config(&self) -> Result<Config, Error> {
        let Some(path) = &self.kubeconfig else {
            return Config::infer()
                .await
                .map_err(|e| Error::client(format!("inferring config: {}", e)));
        };

        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| Error::client(format!("reading {}: {}", path.display(), e)))?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::client(format!("loading {}: {}", path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: String::new(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn not_found_only_matches_404() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(!is_not_found(&api_error(403, "Forbidden")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
    }

    #[test]
    fn already_exists_ignores_write_conflicts() {
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        assert!(!is_already_exists(&api_error(409, "Conflict")));
        assert!(!is_already_exists(&api_error(404, "NotFound")));
    }

    #[test]
    fn client_settings_default_timeouts() {
        let settings = ClientSettings::with_kubeconfig(Some(PathBuf::from("/tmp/kubeconfig")));
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
        assert_eq!(settings.read_timeout, Duration::from_secs(30));
        assert_eq!(settings.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
    }

    #[tokio::test]
    async fn missing_kubeconfig_file_is_client_error() {
        let settings = ClientSettings::with_kubeconfig(Some(PathBuf::from(
            "/nonexistent/porter-operator/kubeconfig",
        )));
        let err = settings.connect().await.err().unwrap();
        assert_eq!(err.kind(), "client");
        assert!(err.to_string().contains("/nonexistent/porter-operator/kubeconfig"));
    }
}
