//! Porter operator: runs Porter bundles for Installation resources

#![deny(missing_docs)]

/// Controller construction
pub mod controller_runner;
/// Startup utilities (CRD install)
pub mod startup;
