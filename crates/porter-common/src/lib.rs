//! Common types for the Porter operator: CRDs, errors, and Kubernetes utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;
pub use events::{EventPublisher, InstallationEvent, KubeEventPublisher, NoopEventPublisher};

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "porter-operator";

/// Label marking every object created by the operator (`porter=true`)
pub const LABEL_PORTER: &str = "porter";

/// Value of [`LABEL_PORTER`] on operator-owned objects
pub const LABEL_PORTER_VALUE: &str = "true";

/// Label carrying the name of the owning Installation
pub const LABEL_INSTALLATION: &str = "installation";

/// Label carrying the execution job name (set on scratch volumes)
pub const LABEL_JOB: &str = "job";

/// Label carrying the UID of the Installation a scratch volume was created for
pub const LABEL_INSTALLATION_UID: &str = "installation-uid";

/// Default name of the per-namespace ConfigMap holding execution defaults
pub const DEFAULT_CONFIG_MAP_NAME: &str = "porter";

/// Requeue interval after a retryable reconcile error
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Requeue interval after a permanent reconcile error (requires a configuration fix)
pub const REQUEUE_PERMANENT_ERROR_SECS: u64 = 300;
