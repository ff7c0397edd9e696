//! Execution configuration resolution
//!
//! Each execution setting is resolved through the same precedence chain:
//!
//! 1. the override on the Installation spec, if non-empty
//! 2. the key in the namespace's default configuration, if present
//! 3. a hard-coded default
//!
//! Namespace defaults come from a [`ConfigProvider`]. A missing or unreadable
//! namespace configuration is never an error; resolution falls through to
//! the hard-coded default. A key that is present but empty is still an
//! explicit value: an empty `outputsVolumeSize` is rejected rather than
//! replaced by the default, while an empty `porterVersion` or
//! `serviceAccount` means "unset".

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::Api;
use kube::{Client, ResourceExt};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use porter_common::crd::Installation;
use porter_common::kube_utils::get_optional;
use porter_common::Error;

use crate::quantity::parse_storage_quantity;

/// Scratch volume size when nothing else is configured
pub const DEFAULT_OUTPUTS_VOLUME_SIZE: &str = "128Mi";

/// Executor image version when nothing else is configured
pub const DEFAULT_PORTER_VERSION: &str = "latest";

/// Namespace configuration key for the scratch volume size
pub const CONFIG_KEY_OUTPUTS_VOLUME_SIZE: &str = "outputsVolumeSize";

/// Namespace configuration key for the executor image version
pub const CONFIG_KEY_PORTER_VERSION: &str = "porterVersion";

/// Namespace configuration key for the executor service account
pub const CONFIG_KEY_SERVICE_ACCOUNT: &str = "serviceAccount";

/// Image tags that move over time and must always be re-pulled
const FLOATING_TAGS: [&str; 2] = ["latest", "canary"];

/// Source of namespace-scoped default settings
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Look up `key` in the default configuration for `namespace`.
    ///
    /// Returns `None` when the configuration or the key does not exist, or
    /// when the configuration cannot be read.
    async fn lookup(&self, namespace: &str, key: &str) -> Option<String>;
}

/// [`ConfigProvider`] backed by a ConfigMap in each namespace
pub struct ConfigMapProvider {
    client: Client,
    config_map_name: String,
}

impl ConfigMapProvider {
    /// Read defaults from the ConfigMap called `config_map_name`
    pub fn new(client: Client, config_map_name: impl Into<String>) -> Self {
        Self {
            client,
            config_map_name: config_map_name.into(),
        }
    }
}

#[async_trait]
impl ConfigProvider for ConfigMapProvider {
    async fn lookup(&self, namespace: &str, key: &str) -> Option<String> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match get_optional(&api, &self.config_map_name).await {
            Ok(Some(cm)) => cm.data.and_then(|mut data| data.remove(key)),
            Ok(None) => {
                info!(
                    namespace = %namespace,
                    config_map = %self.config_map_name,
                    "namespace configuration not found, using built-in defaults"
                );
                None
            }
            Err(e) => {
                info!(
                    namespace = %namespace,
                    config_map = %self.config_map_name,
                    error = %e,
                    "cannot read namespace configuration, using built-in defaults"
                );
                None
            }
        }
    }
}

/// Which tier of the precedence chain supplied a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingSource {
    /// Set on the Installation spec
    Installation,
    /// Taken from the namespace default configuration
    Namespace,
    /// Hard-coded default
    Default,
}

impl std::fmt::Display for SettingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingSource::Installation => write!(f, "installation"),
            SettingSource::Namespace => write!(f, "namespace"),
            SettingSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved setting together with where it came from
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Tier that supplied the value
    pub source: SettingSource,
}

/// Image pull policy for the executor container
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullPolicy {
    /// Pull on every start
    Always,
    /// Use a cached image when present
    IfNotPresent,
}

impl PullPolicy {
    /// Floating tags are always pulled; pinned versions may come from cache
    pub fn for_version(version: &str) -> Self {
        if FLOATING_TAGS.contains(&version) {
            PullPolicy::Always
        } else {
            PullPolicy::IfNotPresent
        }
    }

    /// Kubernetes `imagePullPolicy` value
    pub fn as_str(&self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

/// Executor image version and the pull policy it implies
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorVersion {
    /// Version tag of the executor image
    pub version: String,
    /// Pull policy derived from the version
    pub pull_policy: PullPolicy,
}

impl ExecutorVersion {
    /// Build from a version string, deriving its pull policy
    pub fn new(version: impl Into<String>) -> Self {
        let version = version.into();
        let pull_policy = PullPolicy::for_version(&version);
        Self {
            version,
            pull_policy,
        }
    }
}

/// Resolves execution settings for an Installation.
///
/// Holds no state between calls; every lookup re-reads the namespace
/// configuration through the provider.
pub struct ConfigResolver<'a> {
    provider: &'a dyn ConfigProvider,
}

impl<'a> ConfigResolver<'a> {
    /// Create a resolver reading namespace defaults from `provider`
    pub fn new(provider: &'a dyn ConfigProvider) -> Self {
        Self { provider }
    }

    /// Resolve the scratch volume size.
    ///
    /// A value that does not parse as a quantity is a configuration error,
    /// whichever tier it came from.
    pub async fn volume_size(&self, inst: &Installation) -> Result<Resolved<Quantity>, Error> {
        let resolved = self
            .resolve(
                inst,
                CONFIG_KEY_OUTPUTS_VOLUME_SIZE,
                inst.spec.outputs_volume_size.as_deref(),
            )
            .await
            .unwrap_or_else(|| Resolved {
                value: DEFAULT_OUTPUTS_VOLUME_SIZE.to_string(),
                source: SettingSource::Default,
            });

        let quantity = parse_storage_quantity(&resolved.value).map_err(|msg| {
            Error::configuration(
                inst.key(),
                CONFIG_KEY_OUTPUTS_VOLUME_SIZE,
                format!("{} (from {} configuration)", msg, resolved.source),
            )
        })?;

        info!(
            installation = %inst.key(),
            outputs_volume_size = %quantity.0,
            source = %resolved.source,
            "resolved bundle outputs volume size"
        );
        Ok(Resolved {
            value: quantity,
            source: resolved.source,
        })
    }

    /// Resolve the executor image version and its pull policy
    pub async fn executor_version(&self, inst: &Installation) -> Resolved<ExecutorVersion> {
        let resolved = self
            .resolve(
                inst,
                CONFIG_KEY_PORTER_VERSION,
                inst.spec.porter_version.as_deref(),
            )
            .await
            .filter(|r| !r.value.is_empty())
            .unwrap_or_else(|| Resolved {
                value: DEFAULT_PORTER_VERSION.to_string(),
                source: SettingSource::Default,
            });

        let version = ExecutorVersion::new(resolved.value);
        info!(
            installation = %inst.key(),
            version = %version.version,
            pull_policy = version.pull_policy.as_str(),
            source = %resolved.source,
            "resolved porter image version"
        );
        Resolved {
            value: version,
            source: resolved.source,
        }
    }

    /// Resolve the service account; `None` means the namespace default account
    pub async fn service_account(&self, inst: &Installation) -> Resolved<Option<String>> {
        let resolved = match self
            .resolve(
                inst,
                CONFIG_KEY_SERVICE_ACCOUNT,
                inst.spec.service_account.as_deref(),
            )
            .await
            .filter(|r| !r.value.is_empty())
        {
            Some(r) => Resolved {
                value: Some(r.value),
                source: r.source,
            },
            None => Resolved {
                value: None,
                source: SettingSource::Default,
            },
        };

        info!(
            installation = %inst.key(),
            service_account = resolved.value.as_deref().unwrap_or_default(),
            source = %resolved.source,
            "resolved porter agent service account"
        );
        resolved
    }

    /// Walk the first two tiers; `None` means the caller's default applies.
    ///
    /// A present namespace key is returned even when empty.
    async fn resolve(
        &self,
        inst: &Installation,
        key: &str,
        instance_override: Option<&str>,
    ) -> Option<Resolved<String>> {
        if let Some(value) = instance_override.filter(|v| !v.is_empty()) {
            debug!(installation = %inst.key(), key, value, "using installation override");
            return Some(Resolved {
                value: value.to_string(),
                source: SettingSource::Installation,
            });
        }

        let namespace = inst.namespace()?;
        let value = self.provider.lookup(&namespace, key).await?;
        debug!(installation = %inst.key(), key, value = %value, "using namespace default");
        Some(Resolved {
            value,
            source: SettingSource::Namespace,
        })
    }
}
