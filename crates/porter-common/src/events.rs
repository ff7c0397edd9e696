//! Kubernetes Events for Installations
//!
//! The reconciler reports what it did as [`InstallationEvent`]s, which show
//! up under `kubectl describe installation`. Publishing is fire-and-forget:
//! a failure is logged and never fails the reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Event reasons
pub mod reasons {
    /// A scratch volume and execution job were created for a new revision
    pub const EXECUTION_JOB_CREATED: &str = "ExecutionJobCreated";
    /// The execution job for the current revision finished
    pub const EXECUTION_JOB_FINISHED: &str = "ExecutionJobFinished";
    /// An execution setting could not be resolved from the configured values
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
}

/// Event actions
pub mod actions {
    /// Creating execution resources
    pub const CREATE: &str = "Create";
    /// Observing an existing execution job
    pub const OBSERVE: &str = "Observe";
    /// Resolving execution settings
    pub const RESOLVE: &str = "Resolve";
}

/// Something the reconciler did or observed for an Installation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstallationEvent {
    /// An execution job was created
    JobCreated {
        /// Job name
        job: String,
        /// Bundle action the job runs
        action: String,
        /// Bundle reference
        reference: String,
    },
    /// The active execution job reached a terminal state
    JobFinished {
        /// Job name
        job: String,
        /// Whether the job failed
        failed: bool,
    },
    /// A configured setting is unusable; nothing was created
    InvalidConfiguration {
        /// What is wrong
        message: String,
    },
}

impl InstallationEvent {
    /// Normal or Warning
    pub fn event_type(&self) -> EventType {
        match self {
            InstallationEvent::JobCreated { .. } => EventType::Normal,
            InstallationEvent::JobFinished { failed, .. } => {
                if *failed {
                    EventType::Warning
                } else {
                    EventType::Normal
                }
            }
            InstallationEvent::InvalidConfiguration { .. } => EventType::Warning,
        }
    }

    /// Machine-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            InstallationEvent::JobCreated { .. } => reasons::EXECUTION_JOB_CREATED,
            InstallationEvent::JobFinished { .. } => reasons::EXECUTION_JOB_FINISHED,
            InstallationEvent::InvalidConfiguration { .. } => reasons::INVALID_CONFIGURATION,
        }
    }

    /// Action the controller was taking
    pub fn action(&self) -> &'static str {
        match self {
            InstallationEvent::JobCreated { .. } => actions::CREATE,
            InstallationEvent::JobFinished { .. } => actions::OBSERVE,
            InstallationEvent::InvalidConfiguration { .. } => actions::RESOLVE,
        }
    }

    /// Human-readable note
    pub fn note(&self) -> String {
        match self {
            InstallationEvent::JobCreated {
                job,
                action,
                reference,
            } => format!("Created job {} to {} {}", job, action, reference),
            InstallationEvent::JobFinished { job, failed } => {
                format!("Job {} {}", job, if *failed { "failed" } else { "succeeded" })
            }
            InstallationEvent::InvalidConfiguration { message } => message.clone(),
        }
    }
}

/// Sink for Installation events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` against the Installation referenced by `installation`
    async fn publish(&self, installation: &ObjectReference, event: InstallationEvent);
}

/// Publishes through `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller_name`, instance taken from `POD_NAME`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, installation: &ObjectReference, event: InstallationEvent) {
        let kube_event = Event {
            type_: event.event_type(),
            reason: event.reason().to_string(),
            note: Some(event.note()),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&kube_event, installation).await {
            warn!(
                installation = installation.name.as_deref().unwrap_or_default(),
                reason = event.reason(),
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Discards events
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _installation: &ObjectReference, _event: InstallationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_created_is_normal_with_bundle_details() {
        let event = InstallationEvent::JobCreated {
            job: "wordpress-5".to_string(),
            action: "install".to_string(),
            reference: "example.com/wordpress-bundle:v1".to_string(),
        };
        assert_eq!(event.event_type(), EventType::Normal);
        assert_eq!(event.reason(), "ExecutionJobCreated");
        assert_eq!(event.action(), "Create");
        assert_eq!(
            event.note(),
            "Created job wordpress-5 to install example.com/wordpress-bundle:v1"
        );
    }

    #[test]
    fn failed_job_is_a_warning() {
        let failed = InstallationEvent::JobFinished {
            job: "wordpress-5".to_string(),
            failed: true,
        };
        assert_eq!(failed.event_type(), EventType::Warning);
        assert_eq!(failed.note(), "Job wordpress-5 failed");

        let succeeded = InstallationEvent::JobFinished {
            job: "wordpress-5".to_string(),
            failed: false,
        };
        assert_eq!(succeeded.event_type(), EventType::Normal);
        assert_eq!(succeeded.note(), "Job wordpress-5 succeeded");
    }

    #[test]
    fn invalid_configuration_carries_message() {
        let event = InstallationEvent::InvalidConfiguration {
            message: "invalid quantity 'notasize'".to_string(),
        };
        assert_eq!(event.event_type(), EventType::Warning);
        assert_eq!(event.reason(), "InvalidConfiguration");
        assert_eq!(event.note(), "invalid quantity 'notasize'");
    }

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                InstallationEvent::JobFinished {
                    job: "wordpress-5".to_string(),
                    failed: false,
                },
            )
            .await;
    }
}
