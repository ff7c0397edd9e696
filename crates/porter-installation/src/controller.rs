//! Installation reconciliation controller
//!
//! Turns each revision of an Installation into exactly one execution Job:
//! - load the Installation; a missing object is treated as deleted
//! - derive the job name `<name>-<revision>` and look it up; a job owned by
//!   a previous Installation of the same name is an error, never adopted
//! - if absent, resolve configuration, create the scratch volume, then the Job
//! - record the active and last job references in status
//!
//! Creates are idempotent: "already exists" counts as success, so a pass that
//! is repeated after a crash or a duplicate trigger converges instead of
//! failing. Nothing is retried internally; errors go back to the controller
//! runtime, which requeues per [`error_policy`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use porter_common::crd::{Installation, InstallationStatus, JobReference};
use porter_common::events::InstallationEvent;
use porter_common::kube_utils::{
    create_if_absent, get_optional, patch_resource_status, CreateOutcome,
};
use porter_common::metrics;
use porter_common::{
    Error, EventPublisher, KubeEventPublisher, NoopEventPublisher, FIELD_MANAGER,
    REQUEUE_ERROR_SECS, REQUEUE_PERMANENT_ERROR_SECS,
};

use crate::config::{ConfigMapProvider, ConfigProvider, ConfigResolver};
use crate::job::{self, ExecutionSettings};

/// Executor image repository used when none is configured
pub const DEFAULT_EXECUTOR_IMAGE: &str = "ghcr.io/getporter/porter";

/// Name the controller reports as in Kubernetes events
const CONTROLLER_NAME: &str = "porter-operator";

// =============================================================================
// Kubernetes client abstraction
// =============================================================================

/// Cluster operations needed by the installation reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstallationKubeClient: Send + Sync {
    /// Get an Installation by name; `None` if it does not exist
    async fn get_installation(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Installation>, Error>;

    /// Get an execution Job by name; `None` if it does not exist
    async fn get_job(&self, name: &str, namespace: &str) -> Result<Option<Job>, Error>;

    /// Get a scratch volume claim by name; `None` if it does not exist
    async fn get_volume_claim(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error>;

    /// Create a scratch volume claim, tolerating one that already exists
    async fn create_volume_claim(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<CreateOutcome, Error>;

    /// Create an execution Job, tolerating one that already exists
    async fn create_job(&self, namespace: &str, job: &Job) -> Result<CreateOutcome, Error>;

    /// Replace the job references in an Installation's status
    async fn patch_installation_status(
        &self,
        name: &str,
        namespace: &str,
        status: &InstallationStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct InstallationKubeClientImpl {
    client: Client,
}

impl InstallationKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InstallationKubeClient for InstallationKubeClientImpl {
    async fn get_installation(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Installation>, Error> {
        let api: Api<Installation> = Api::namespaced(self.client.clone(), namespace);
        get_optional(&api, name).await
    }

    async fn get_job(&self, name: &str, namespace: &str) -> Result<Option<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        get_optional(&api, name).await
    }

    async fn get_volume_claim(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        get_optional(&api, name).await
    }

    async fn create_volume_claim(
        &self,
        namespace: &str,
        pvc: &PersistentVolumeClaim,
    ) -> Result<CreateOutcome, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        create_if_absent(&api, &pvc.name_any(), pvc).await
    }

    async fn create_job(&self, namespace: &str, job: &Job) -> Result<CreateOutcome, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        create_if_absent(&api, &job.name_any(), job).await
    }

    async fn patch_installation_status(
        &self,
        name: &str,
        namespace: &str,
        status: &InstallationStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<Installation>(&self.client, name, namespace, status, FIELD_MANAGER)
            .await
    }
}

// =============================================================================
// Controller context
// =============================================================================

/// Shared state for the installation controller
pub struct InstallationContext {
    /// Cluster operations
    pub kube: Arc<dyn InstallationKubeClient>,
    /// Source of namespace default configuration
    pub config: Arc<dyn ConfigProvider>,
    /// Kubernetes event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Executor image repository (tag is derived from the resolved version)
    pub executor_image: String,
}

impl InstallationContext {
    /// Create a context from explicit collaborators
    pub fn new(
        kube: Arc<dyn InstallationKubeClient>,
        config: Arc<dyn ConfigProvider>,
        events: Arc<dyn EventPublisher>,
        executor_image: impl Into<String>,
    ) -> Self {
        Self {
            kube,
            config,
            events,
            executor_image: executor_image.into(),
        }
    }

    /// Create a context backed by a live cluster.
    ///
    /// Namespace defaults are read from the ConfigMap named `config_map_name`
    /// in each Installation's namespace.
    pub fn from_client(
        client: Client,
        config_map_name: &str,
        executor_image: impl Into<String>,
    ) -> Self {
        Self::new(
            Arc::new(InstallationKubeClientImpl::new(client.clone())),
            Arc::new(ConfigMapProvider::new(client.clone(), config_map_name)),
            Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            executor_image,
        )
    }

    /// Create a context for testing with mock collaborators and no events
    pub fn for_testing(
        kube: Arc<dyn InstallationKubeClient>,
        config: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self::new(kube, config, Arc::new(NoopEventPublisher), DEFAULT_EXECUTOR_IMAGE)
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

/// Reconcile an Installation delivered by the controller runtime.
///
/// The object is re-read by name so the pass always acts on the latest
/// revision rather than the cached copy that triggered it.
#[instrument(
    skip(installation, ctx),
    fields(installation = %installation.key(), revision = ?installation.revision_token())
)]
pub async fn reconcile(
    installation: Arc<Installation>,
    ctx: Arc<InstallationContext>,
) -> Result<Action, Error> {
    let name = installation.name_any();
    let namespace = installation.namespace().ok_or_else(|| {
        Error::validation_for(installation.key(), "Installation must be namespaced")
    })?;

    reconcile_installation(&namespace, &name, &ctx).await
}

/// Reconcile the Installation `namespace/name` and record metrics for the pass
pub async fn reconcile_installation(
    namespace: &str,
    name: &str,
    ctx: &InstallationContext,
) -> Result<Action, Error> {
    let start = Instant::now();
    let result = reconcile_revision(namespace, name, ctx).await;
    metrics::record_reconcile(start.elapsed(), result.as_ref().err());
    result
}

async fn reconcile_revision(
    namespace: &str,
    name: &str,
    ctx: &InstallationContext,
) -> Result<Action, Error> {
    let key = format!("{}/{}", namespace, name);

    let Some(inst) = ctx
        .kube
        .get_installation(name, namespace)
        .await
        .map_err(|e| Error::reconcile(&key, "get installation", e))?
    else {
        info!(installation = %key, "installation not found, assuming it was deleted");
        return Ok(Action::await_change());
    };

    let revision = inst
        .revision_token()
        .ok_or_else(|| Error::validation_for(&key, "installation has no revision"))?;
    let job_name = job::job_name(name, &revision);
    let location = format!("{}@{}", key, revision);

    let existing = ctx
        .kube
        .get_job(&job_name, namespace)
        .await
        .map_err(|e| Error::reconcile(&location, "get execution job", e))?;

    let finished = match existing {
        Some(existing) => {
            ensure_owned_by(&inst, job::job_owner_uid(&existing), "execution job", &job_name)?;
            let finished = job::is_job_finished(&existing);
            debug!(
                installation = %key,
                job = %job_name,
                finished,
                "execution job for current revision exists"
            );
            if finished && inst.active_job_name() == Some(job_name.as_str()) {
                publish_job_finished(&inst, &existing, &job_name, ctx).await;
            }
            finished
        }
        None => {
            info!(installation = %key, job = %job_name, "creating execution resources");
            create_execution_resources(&inst, namespace, &job_name, &location, ctx).await?;
            false
        }
    };

    if let Some(status) = next_status(inst.status.as_ref(), &job_name, finished) {
        ctx.kube
            .patch_installation_status(name, namespace, &status)
            .await
            .map_err(|e| Error::reconcile(&location, "update installation status", e))?;
        debug!(installation = %key, ?status, "updated installation status");
    }

    Ok(Action::await_change())
}

/// Create the scratch volume and then the execution Job.
///
/// Configuration that cannot be used aborts before anything is created. A
/// volume creation failure aborts before the Job is attempted. A volume left
/// behind by a failed Job creation is reused on the next pass.
async fn create_execution_resources(
    inst: &Installation,
    namespace: &str,
    job_name: &str,
    location: &str,
    ctx: &InstallationContext,
) -> Result<(), Error> {
    let resolver = ConfigResolver::new(ctx.config.as_ref());

    let size = match resolver.volume_size(inst).await {
        Ok(resolved) => resolved.value,
        Err(e) => {
            ctx.events
                .publish(
                    &inst.object_ref(&()),
                    InstallationEvent::InvalidConfiguration {
                        message: e.to_string(),
                    },
                )
                .await;
            return Err(Error::reconcile(location, "resolve outputs volume size", e));
        }
    };

    let owner = inst
        .controller_owner_ref(&())
        .map(|owner| OwnerReference {
            block_owner_deletion: Some(true),
            ..owner
        })
        .ok_or_else(|| Error::validation_for(inst.key(), "Installation has no UID"))?;

    let pvc = job::build_volume_claim(inst, job_name, size);
    let pvc_outcome = ctx
        .kube
        .create_volume_claim(namespace, &pvc)
        .await
        .map_err(|e| Error::reconcile(location, "create volume claim", e))?;
    match pvc_outcome {
        CreateOutcome::Created => {
            info!(installation = %location, volume = %job_name, "created scratch volume claim")
        }
        CreateOutcome::AlreadyExisted => {
            let existing = ctx
                .kube
                .get_volume_claim(job_name, namespace)
                .await
                .map_err(|e| Error::reconcile(location, "get volume claim", e))?;
            match existing {
                Some(existing) => ensure_owned_by(
                    inst,
                    job::volume_claim_owner_uid(&existing),
                    "volume claim",
                    job_name,
                )?,
                None => warn!(
                    installation = %location,
                    volume = %job_name,
                    "scratch volume claim vanished after create reported it exists"
                ),
            }
            info!(
                installation = %location,
                volume = %job_name,
                "scratch volume claim already exists, reusing it"
            );
        }
    }

    let settings = ExecutionSettings {
        image_repository: ctx.executor_image.clone(),
        version: resolver.executor_version(inst).await.value,
        service_account: resolver.service_account(inst).await.value,
    };
    let job = job::build_execution_job(inst, job_name, owner, &settings);

    let job_outcome = ctx
        .kube
        .create_job(namespace, &job)
        .await
        .map_err(|e| Error::reconcile(location, "create execution job", e))?;
    match job_outcome {
        CreateOutcome::Created => {
            info!(
                installation = %location,
                job = %job_name,
                image = %settings.image(),
                action = %inst.spec.action,
                "created execution job"
            );
            metrics::record_job_created(&inst.spec.action);
            ctx.events
                .publish(
                    &inst.object_ref(&()),
                    InstallationEvent::JobCreated {
                        job: job_name.to_string(),
                        action: inst.spec.action.clone(),
                        reference: inst.spec.reference.clone(),
                    },
                )
                .await;
        }
        CreateOutcome::AlreadyExisted => info!(
            installation = %location,
            job = %job_name,
            "execution job already exists, nothing to do"
        ),
    }

    Ok(())
}

async fn publish_job_finished(
    inst: &Installation,
    job: &Job,
    job_name: &str,
    ctx: &InstallationContext,
) {
    let failed = job::is_job_failed(job);
    info!(installation = %inst.key(), job = %job_name, failed, "execution job finished");
    ctx.events
        .publish(
            &inst.object_ref(&()),
            InstallationEvent::JobFinished {
                job: job_name.to_string(),
                failed,
            },
        )
        .await;
}

/// Refuse an object named for this revision that was created for another
/// Installation with the same name.
///
/// Generations restart at 1 when an Installation is deleted and recreated, so
/// a job or claim left behind by the earlier object can collide with the new
/// one.
fn ensure_owned_by(
    inst: &Installation,
    owner_uid: Option<&str>,
    kind: &str,
    object_name: &str,
) -> Result<(), Error> {
    let uid = inst.uid();
    if owner_uid.is_some() && owner_uid == uid.as_deref() {
        return Ok(());
    }
    Err(Error::validation_for(
        inst.key(),
        format!(
            "{} {} belongs to another Installation (owner uid {}, expected {}); delete it to continue",
            kind,
            object_name,
            owner_uid.unwrap_or("<none>"),
            uid.as_deref().unwrap_or("<none>")
        ),
    ))
}

/// Compute the status after observing the current revision's job.
///
/// A running job becomes `activeJob`, pushing a different previous active
/// job into `lastJob`. A finished job is moved to `lastJob`. Returns `None`
/// when the status is already up to date.
fn next_status(
    current: Option<&InstallationStatus>,
    job_name: &str,
    finished: bool,
) -> Option<InstallationStatus> {
    let current = current.cloned().unwrap_or_default();
    let job = JobReference::new(job_name);

    let next = if finished {
        InstallationStatus {
            active_job: None,
            last_job: Some(job),
        }
    } else {
        let last_job = match &current.active_job {
            Some(previous) if previous.name != job_name => Some(previous.clone()),
            _ => current.last_job.clone(),
        };
        InstallationStatus {
            active_job: Some(job),
            last_job,
        }
    };

    (next != current).then_some(next)
}

/// Error policy for the installation controller.
///
/// Retryable errors requeue quickly. Permanent errors (bad configuration,
/// rejected requests) requeue slowly; they repeat until the Installation or
/// namespace configuration is fixed.
pub fn error_policy(
    installation: Arc<Installation>,
    error: &Error,
    _ctx: Arc<InstallationContext>,
) -> Action {
    error!(
        ?error,
        installation = %installation.key(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    } else {
        Action::requeue(Duration::from_secs(REQUEUE_PERMANENT_ERROR_SECS))
    }
}
