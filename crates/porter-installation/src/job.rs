//! Execution resource construction
//!
//! Builds the scratch volume claim and the batch Job that runs the Porter
//! executor for one revision of an Installation. Both objects are named
//! `<installation>-<revision>` so that a second reconcile of the same
//! revision targets the same objects.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, SecretEnvSource,
    SecretVolumeSource, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;

use porter_common::crd::Installation;
use porter_common::{
    LABEL_INSTALLATION, LABEL_INSTALLATION_UID, LABEL_JOB, LABEL_PORTER, LABEL_PORTER_VALUE,
};

use crate::config::ExecutorVersion;

/// Driver the executor uses to run bundles inside the cluster
pub const EXECUTOR_DRIVER: &str = "kubernetes";

/// Mount path of the scratch volume inside the executor container
pub const SHARED_VOLUME_PATH: &str = "/porter-shared";

/// Mount path of the optional executor configuration secret
pub const CONFIG_VOLUME_PATH: &str = "/porter-config";

/// Optional secret holding executor configuration files
pub const CONFIG_SECRET_NAME: &str = "porter-config";

/// Optional secret whose keys become executor environment variables
pub const ENV_SECRET_NAME: &str = "porter-env";

const SHARED_VOLUME_NAME: &str = "porter-shared";
const CONFIG_VOLUME_NAME: &str = "porter-config";

/// Lifecycle verbs the executor accepts as a top-level command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CoreAction {
    /// Install the bundle
    Install,
    /// Upgrade an existing installation
    Upgrade,
    /// Uninstall the bundle
    Uninstall,
}

impl CoreAction {
    /// Parse a core verb; custom actions return `None`
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "install" => Some(CoreAction::Install),
            "upgrade" => Some(CoreAction::Upgrade),
            "uninstall" => Some(CoreAction::Uninstall),
            _ => None,
        }
    }

    /// Command name passed to the executor
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreAction::Install => "install",
            CoreAction::Upgrade => "upgrade",
            CoreAction::Uninstall => "uninstall",
        }
    }
}

/// Derive the execution job (and scratch volume) name for a revision
pub fn job_name(installation_name: &str, revision: &str) -> String {
    format!("{}-{}", installation_name, revision)
}

/// Settings resolved for one execution, independent of the Installation spec
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionSettings {
    /// Executor image repository, without tag
    pub image_repository: String,
    /// Executor version and pull policy
    pub version: ExecutorVersion,
    /// Service account for the executor pod; `None` uses the namespace default
    pub service_account: Option<String>,
}

impl ExecutionSettings {
    /// Full executor image reference
    pub fn image(&self) -> String {
        format!(
            "{}:kubernetes-{}",
            self.image_repository, self.version.version
        )
    }
}

/// Build the executor command line.
///
/// ```text
/// <action | invoke --action=X> <name> --reference=<ref> --debug --debug-plugins
///   --driver=kubernetes [-c=<set>]* [-p=<set>]* [--param=<k>=<v>]*
/// ```
///
/// Literal parameters are emitted in key order.
pub fn build_executor_args(inst: &Installation) -> Vec<String> {
    let spec = &inst.spec;
    let mut args = Vec::new();

    match CoreAction::parse(&spec.action) {
        Some(action) => args.push(action.as_str().to_string()),
        None => {
            args.push("invoke".to_string());
            args.push(format!("--action={}", spec.action));
        }
    }

    args.push(inst.name_any());
    args.push(format!("--reference={}", spec.reference));
    args.push("--debug".to_string());
    args.push("--debug-plugins".to_string());
    args.push(format!("--driver={}", EXECUTOR_DRIVER));

    args.extend(spec.credential_sets.iter().map(|c| format!("-c={}", c)));
    args.extend(spec.parameter_sets.iter().map(|p| format!("-p={}", p)));
    args.extend(
        spec.parameters
            .iter()
            .map(|(k, v)| format!("--param={}={}", k, v)),
    );

    args
}

/// Labels shared by every object created for an Installation
fn installation_labels(installation_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_PORTER.to_string(), LABEL_PORTER_VALUE.to_string()),
        (
            LABEL_INSTALLATION.to_string(),
            installation_name.to_string(),
        ),
    ])
}

/// Label selector the executor uses to find objects it owns
fn executor_label_selector(installation_name: &str) -> String {
    format!(
        "{}={} {}={}",
        LABEL_PORTER, LABEL_PORTER_VALUE, LABEL_INSTALLATION, installation_name
    )
}

/// Build the scratch volume claim shared between the executor and the bundle.
///
/// The claim carries labels only. It is not owned by the Installation and
/// outlives the job; cleanup is left to external tooling. The
/// `installation-uid` label records which incarnation of the Installation
/// the claim was made for.
pub fn build_volume_claim(
    inst: &Installation,
    job_name: &str,
    size: Quantity,
) -> PersistentVolumeClaim {
    let mut labels = installation_labels(&inst.name_any());
    labels.insert(LABEL_JOB.to_string(), job_name.to_string());
    if let Some(uid) = inst.uid() {
        labels.insert(LABEL_INSTALLATION_UID.to_string(), uid);
    }

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: inst.namespace(),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), size)])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the execution Job for one revision.
///
/// The Job:
/// - Runs exactly once (`completions: 1`, `backoffLimit: 0`, restart `Never`)
/// - Mounts the scratch volume plus the optional `porter-config` secret
/// - Loads optional plugin environment from the `porter-env` secret
/// - Is owned by the Installation (cascade deletion)
pub fn build_execution_job(
    inst: &Installation,
    job_name: &str,
    owner: OwnerReference,
    settings: &ExecutionSettings,
) -> Job {
    let installation_name = inst.name_any();
    let namespace = inst.namespace().unwrap_or_default();
    let labels = installation_labels(&installation_name);

    let env = vec![
        env_var("KUBE_NAMESPACE", &namespace),
        env_var("IN_CLUSTER", "true"),
        env_var("LABELS", &executor_label_selector(&installation_name)),
        env_var("JOB_VOLUME_NAME", job_name),
        env_var("JOB_VOLUME_PATH", SHARED_VOLUME_PATH),
        env_var("CLEANUP_JOBS", "false"),
    ];

    let container = Container {
        name: job_name.to_string(),
        image: Some(settings.image()),
        image_pull_policy: Some(settings.version.pull_policy.as_str().to_string()),
        args: Some(build_executor_args(inst)),
        env: Some(env),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: ENV_SECRET_NAME.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: SHARED_VOLUME_NAME.to_string(),
                mount_path: SHARED_VOLUME_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: CONFIG_VOLUME_NAME.to_string(),
                mount_path: CONFIG_VOLUME_PATH.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    };

    let volumes = vec![
        Volume {
            name: SHARED_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: job_name.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
        Volume {
            name: CONFIG_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(CONFIG_SECRET_NAME.to_string()),
                optional: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];

    Job {
        metadata: ObjectMeta {
            name: Some(job_name.to_string()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            completions: Some(1),
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(volumes),
                    restart_policy: Some("Never".to_string()),
                    service_account_name: settings
                        .service_account
                        .clone()
                        .filter(|sa| !sa.is_empty()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

/// UID of the Installation that controls `job`
pub fn job_owner_uid(job: &Job) -> Option<&str> {
    job.metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|owner| owner.controller == Some(true))
        .map(|owner| owner.uid.as_str())
}

/// UID of the Installation a scratch volume claim was created for
pub fn volume_claim_owner_uid(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.metadata
        .labels
        .as_ref()?
        .get(LABEL_INSTALLATION_UID)
        .map(String::as_str)
}

/// Check if a Job has completed successfully
pub fn is_job_complete(job: &Job) -> bool {
    has_true_condition(job, "Complete")
}

/// Check if a Job has failed
pub fn is_job_failed(job: &Job) -> bool {
    has_true_condition(job, "Failed")
}

/// Check if a Job has reached a terminal state
pub fn is_job_finished(job: &Job) -> bool {
    is_job_complete(job) || is_job_failed(job)
}

fn has_true_condition(job: &Job, type_: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == type_ && c.status == "True")
        })
        .unwrap_or(false)
}
