//! Error type shared by the Porter operator crates
//!
//! Reconcile failures are wrapped in [`Error::Reconcile`] with the
//! installation key (`namespace/name@revision`) and the step that failed, so
//! a single log line locates the object and the point of failure.

use thiserror::Error;

/// Main error type for Porter operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A configured execution setting could not be used
    #[error("invalid configuration for {installation}: {field}: {message}")]
    Configuration {
        /// Installation key (`namespace/name`)
        installation: String,
        /// Configuration key that carried the bad value (e.g. "outputsVolumeSize")
        field: String,
        /// What is wrong with the value
        message: String,
    },

    /// The Installation object itself is unusable (no namespace, no UID)
    #[error("invalid installation {installation}: {message}")]
    Validation {
        /// Installation key (`namespace/name`)
        installation: String,
        /// What is missing or wrong
        message: String,
    },

    /// The Kubernetes client could not be configured
    #[error("kubernetes client setup failed: {message}")]
    Client {
        /// What failed while loading configuration or building the client
        message: String,
    },

    /// A reconcile step failed
    #[error("{operation} failed for {installation}: {source}")]
    Reconcile {
        /// Installation key (`namespace/name@revision`)
        installation: String,
        /// Step that failed (e.g. "create volume claim")
        operation: String,
        /// The underlying error
        source: Box<Error>,
    },
}

impl Error {
    /// Create a configuration error for one setting of an installation
    pub fn configuration(
        installation: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Configuration {
            installation: installation.into(),
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error for an installation
    pub fn validation_for(installation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            installation: installation.into(),
            message: msg.into(),
        }
    }

    /// Create a client setup error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client {
            message: msg.into(),
        }
    }

    /// Wrap an error with the installation and reconcile step it came from
    pub fn reconcile(
        installation: impl Into<String>,
        operation: impl Into<String>,
        source: impl Into<Error>,
    ) -> Self {
        Self::Reconcile {
            installation: installation.into(),
            operation: operation.into(),
            source: Box::new(source.into()),
        }
    }

    /// Whether a quick retry can succeed without anyone changing anything.
    ///
    /// Kubernetes 4xx responses are permanent, except write conflicts and
    /// throttling. Bad configuration and unusable Installations need a fix
    /// to the desired state.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Error::Configuration { .. } | Error::Validation { .. } => false,
            Error::Client { .. } => true,
            Error::Reconcile { source, .. } => source.is_retryable(),
        }
    }

    /// Innermost error, with all reconcile context unwrapped
    pub fn root(&self) -> &Error {
        match self {
            Error::Reconcile { source, .. } => source.root(),
            other => other,
        }
    }

    /// Short category label for metrics
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Error::Kube { .. } => "kube",
            Error::Configuration { .. } => "configuration",
            Error::Validation { .. } => "validation",
            Error::Client { .. } => "client",
            Error::Reconcile { .. } => "reconcile",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from the API server"),
            reason: reason.to_string(),
            code,
        })
    }

    /// Story: a bad volume size in the desired state is surfaced with enough
    /// context to fix it without cross-referencing other logs.
    #[test]
    fn story_configuration_error_names_installation_and_field() {
        let err = Error::configuration(
            "apps/wordpress",
            "outputsVolumeSize",
            "invalid quantity 'notasize'",
        );
        let msg = err.to_string();
        assert!(msg.contains("apps/wordpress"));
        assert!(msg.contains("outputsVolumeSize"));
        assert!(msg.contains("notasize"));
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn story_transient_api_errors_are_retried() {
        for (code, reason) in [
            (500, "InternalError"),
            (503, "ServiceUnavailable"),
            (429, "TooManyRequests"),
            (409, "Conflict"),
        ] {
            assert!(Error::from(api_error(code, reason)).is_retryable(), "{code}");
        }
    }

    #[test]
    fn story_client_errors_are_permanent() {
        assert!(!Error::from(api_error(403, "Forbidden")).is_retryable());
        assert!(!Error::from(api_error(422, "Invalid")).is_retryable());
    }

    #[test]
    fn reconcile_wrapper_keeps_context_and_classification() {
        let inner = Error::from(api_error(503, "ServiceUnavailable"));
        let err = Error::reconcile("apps/wordpress@5", "create job", inner);

        let msg = err.to_string();
        assert!(msg.starts_with("create job failed for apps/wordpress@5"));
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "kube");
        assert!(matches!(err.root(), Error::Kube { .. }));
    }

    #[test]
    fn nested_reconcile_wrappers_unwrap_to_root() {
        let err = Error::reconcile(
            "apps/wordpress@1",
            "outer",
            Error::reconcile(
                "apps/wordpress@1",
                "inner",
                Error::validation_for("apps/wordpress", "Installation has no UID"),
            ),
        );
        assert_eq!(err.kind(), "validation");
        assert!(!err.is_retryable());
    }

    #[test]
    fn client_setup_errors_are_labeled() {
        let err = Error::client("failed to infer config: no kubeconfig");
        assert_eq!(err.kind(), "client");
        assert!(err.to_string().contains("no kubeconfig"));
    }
}
