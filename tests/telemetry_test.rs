//! Integration tests for telemetry initialization and span helpers.

use drudge_rs::model::JobId;
use drudge_rs::telemetry::{TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    // Using try_init() in the implementation avoids panics if another
    // test already initialized a subscriber.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "drudge-test".to_string(),
    };
    // This may return Err if a global subscriber was already set by
    // another test in this process; that is acceptable.
    let _guard = init_telemetry(config);
}

#[test]
fn default_config_is_local_only() {
    let config = TelemetryConfig::default();
    assert!(config.endpoint.is_none());
    assert_eq!(config.service_name, "drudge");
}

#[test]
fn job_span_creates_and_records_outcome() {
    let id = JobId::new();
    let span = drudge_rs::telemetry::job::start_job_span("default", &id);
    drudge_rs::telemetry::job::record_job_outcome(&span, "finished");
}
