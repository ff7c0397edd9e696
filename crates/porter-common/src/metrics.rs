//! OpenTelemetry metrics for installation reconciliation
//!
//! Instruments are no-ops until a meter provider is installed by
//! [`crate::telemetry::init_telemetry`].

use std::time::Duration;

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

use crate::Error;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("porter-operator"));

/// Histogram of installation reconciliation duration
///
/// Labels:
/// - `result`: success, error
pub static INSTALLATION_RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("porter_installation_reconcile_duration_seconds")
        .with_description("Duration of installation reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of installation reconciliation errors
///
/// Labels:
/// - `error_type`: transient, permanent
/// - `kind`: kube, configuration, validation, client
pub static INSTALLATION_RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("porter_installation_reconcile_errors_total")
        .with_description("Total number of installation reconciliation errors")
        .with_unit("{errors}")
        .build()
});

/// Counter of execution jobs created
///
/// Labels:
/// - `action`: the bundle action (install, upgrade, ...)
pub static EXECUTION_JOBS_CREATED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("porter_execution_jobs_created_total")
        .with_description("Total number of execution jobs created")
        .with_unit("{jobs}")
        .build()
});

/// Record one reconcile pass that took `elapsed` and ended with `error`, if any
pub fn record_reconcile(elapsed: Duration, error: Option<&Error>) {
    let result = if error.is_some() { "error" } else { "success" };
    INSTALLATION_RECONCILE_DURATION.record(elapsed.as_secs_f64(), &[KeyValue::new("result", result)]);

    if let Some(e) = error {
        INSTALLATION_RECONCILE_ERRORS.add(1, &error_labels(e));
    }
}

/// Record creation of an execution job for `action`
pub fn record_job_created(action: &str) {
    EXECUTION_JOBS_CREATED.add(1, &[KeyValue::new("action", action.to_string())]);
}

fn error_labels(error: &Error) -> [KeyValue; 2] {
    let error_type = if error.is_retryable() {
        "transient"
    } else {
        "permanent"
    };
    [
        KeyValue::new("error_type", error_type),
        KeyValue::new("kind", error.kind()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_labeled_permanent() {
        let err = Error::configuration("apps/wordpress", "outputsVolumeSize", "bad size");
        let labels = error_labels(&err);
        assert_eq!(labels[0], KeyValue::new("error_type", "permanent"));
        assert_eq!(labels[1], KeyValue::new("kind", "configuration"));
    }

    #[test]
    fn client_errors_are_labeled_transient() {
        let labels = error_labels(&Error::client("connection refused"));
        assert_eq!(labels[0], KeyValue::new("error_type", "transient"));
        assert_eq!(labels[1], KeyValue::new("kind", "client"));
    }

    #[test]
    fn recording_without_a_provider_is_harmless() {
        record_reconcile(Duration::from_millis(12), None);
        record_reconcile(Duration::from_millis(3), Some(&Error::client("timeout")));
        record_job_created("install");
    }
}
