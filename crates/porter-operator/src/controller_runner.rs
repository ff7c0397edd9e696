//! Controller runner - builds the installation controller future
//!
//! Construction is separate from `main` so the watch wiring can be reused
//! and reasoned about without a running cluster.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use porter_common::crd::Installation;
use porter_common::{LABEL_PORTER, LABEL_PORTER_VALUE};
use porter_installation::{error_policy, reconcile, InstallationContext};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Settings for the installation controller
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    /// Restrict the watch to one namespace; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Name of the per-namespace ConfigMap holding execution defaults
    pub config_map: String,
    /// Executor image repository
    pub executor_image: String,
}

/// Build the Installation controller future.
///
/// Execution Jobs are watched as owned objects so that a Job finishing
/// re-triggers its Installation.
pub fn build_installation_controller(
    client: Client,
    settings: &ControllerSettings,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let ctx = Arc::new(InstallationContext::from_client(
        client.clone(),
        &settings.config_map,
        settings.executor_image.clone(),
    ));

    let (installations, jobs): (Api<Installation>, Api<Job>) = match &settings.namespace {
        Some(ns) => {
            tracing::info!(namespace = %ns, "- Installation controller (single namespace)");
            (
                Api::namespaced(client.clone(), ns),
                Api::namespaced(client, ns),
            )
        }
        None => {
            tracing::info!("- Installation controller (all namespaces)");
            (Api::all(client.clone()), Api::all(client))
        }
    };

    Box::pin(
        Controller::new(
            installations,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(jobs, owned_job_watcher_config())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Installation")),
    )
}

/// Only Jobs created by the operator are watched
fn owned_job_watcher_config() -> WatcherConfig {
    WatcherConfig::default()
        .labels(&format!("{}={}", LABEL_PORTER, LABEL_PORTER_VALUE))
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_jobs_are_selected_by_porter_label() {
        let config = owned_job_watcher_config();
        assert_eq!(config.label_selector.as_deref(), Some("porter=true"));
        assert_eq!(config.timeout, Some(WATCH_TIMEOUT_SECS));
    }
}
