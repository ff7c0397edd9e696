//! Custom Resource Definitions for the Porter operator

mod installation;

pub use installation::{
    Installation, InstallationSpec, InstallationStatus, JobReference, INSTALLATION_API_GROUP,
    INSTALLATION_API_VERSION, INSTALLATION_CRD_NAME,
};
