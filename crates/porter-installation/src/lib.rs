//! Installation controller for the Porter operator
//!
//! Watches Installation CRDs and runs one execution Job per revision:
//! - Resolves execution settings (volume size, executor version, service
//!   account) from the Installation, its namespace defaults, or built-ins
//! - Creates a scratch volume claim and a Job running the Porter executor
//! - Records the active and last job in Installation status
//!
//! Job names are derived from the Installation name and revision, so
//! re-running a reconcile never creates a second Job for the same revision.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod job;
mod quantity;

pub use config::{
    ConfigMapProvider, ConfigProvider, ConfigResolver, ExecutorVersion, PullPolicy, Resolved,
    SettingSource,
};
pub use controller::{
    error_policy, reconcile, reconcile_installation, InstallationContext, InstallationKubeClient,
    InstallationKubeClientImpl, DEFAULT_EXECUTOR_IMAGE,
};
pub use quantity::parse_storage_quantity;
