//! Startup utilities for the Porter operator

mod crds;

pub use crds::{ensure_crds_installed, operator_crds};
