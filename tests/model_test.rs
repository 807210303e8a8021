//! Unit tests for the data model: state derivation and payload conventions.
//!
//! Everything here is pure — no Postgres required.

use chrono::{Duration, Utc};
use drudge_rs::model::{Job, JobCall, JobId, JobReport, JobState};
use serde_json::json;

/// A bare ready job: no reservation, full budget, past delay.
fn base_job() -> Job {
    let now = Utc::now();
    Job {
        id: JobId::new(),
        queue: "default".to_string(),
        created_at: now - Duration::seconds(10),
        delayed_until: now - Duration::seconds(10),
        started_at: None,
        ended_at: None,
        tries: 3,
        retry_delay: 60,
        timeout: 300,
        worker_id: None,
        payload: json!({"func": "noop", "args": [], "kwargs": {}}),
        result: None,
    }
}

// ---------------------------------------------------------------------------
// Derived state
// ---------------------------------------------------------------------------

#[test]
fn unreserved_job_with_past_delay_is_ready() {
    let job = base_job();
    assert_eq!(job.state_at(Utc::now()), JobState::Ready);
}

#[test]
fn unreserved_job_with_future_delay_is_delayed() {
    let mut job = base_job();
    job.delayed_until = Utc::now() + Duration::seconds(3600);
    assert_eq!(job.state_at(Utc::now()), JobState::Delayed);
}

#[test]
fn delay_boundary_counts_as_ready() {
    // DELAYED requires delayed_until strictly in the future.
    let job = base_job();
    assert_eq!(job.state_at(job.delayed_until), JobState::Ready);
}

#[test]
fn exhausted_tries_is_failed_even_while_delayed() {
    // Exhaustion wins over the delay check; a buried job never comes back
    // on its own.
    let mut job = base_job();
    job.tries = 0;
    job.delayed_until = Utc::now() + Duration::seconds(3600);
    assert_eq!(job.state_at(Utc::now()), JobState::Failed);
}

#[test]
fn reserved_means_started_without_result() {
    let mut job = base_job();
    job.started_at = Some(Utc::now());
    job.worker_id = Some("w1".to_string());
    assert_eq!(job.state_at(Utc::now()), JobState::Reserved);
}

#[test]
fn started_with_result_is_finished() {
    let mut job = base_job();
    job.started_at = Some(Utc::now());
    job.result = Some(json!({"result": 42, "exc": null}));
    assert_eq!(job.state_at(Utc::now()), JobState::Finished);
}

#[test]
fn finished_outranks_exhausted_tries() {
    // tries only matters while unreserved; a finished row with a spent
    // budget is still finished.
    let mut job = base_job();
    job.started_at = Some(Utc::now());
    job.result = Some(json!({"result": null, "exc": null}));
    job.tries = 0;
    assert_eq!(job.state_at(Utc::now()), JobState::Finished);
}

#[test]
fn result_on_an_unreserved_row_does_not_finish_it() {
    // FINISHED requires started_at; a never-claimed row keeps deriving
    // from the ready-pool fields no matter what sits in result.
    let mut job = base_job();
    job.result = Some(json!({"result": "stale", "exc": null}));
    assert_eq!(job.state_at(Utc::now()), JobState::Ready);
}

// ---------------------------------------------------------------------------
// State display / parse
// ---------------------------------------------------------------------------

#[test]
fn state_display_and_parse_agree() {
    for state in JobState::ALL {
        let parsed: JobState = state.to_string().parse().unwrap();
        assert_eq!(parsed, state);
    }
}

#[test]
fn unknown_state_string_errors() {
    assert!("queued".parse::<JobState>().is_err());
}

#[test]
fn job_id_displays_short_prefix() {
    let id = JobId::new();
    assert_eq!(id.to_string(), id.0.to_string()[..8]);
}

// ---------------------------------------------------------------------------
// Payload conventions
// ---------------------------------------------------------------------------

#[test]
fn job_call_builds_expected_payload_shape() {
    let call = JobCall::new("send_email")
        .arg(json!("kelly@example.com"))
        .kwarg("subject", json!("hi"));

    let payload: serde_json::Value = call.into();
    assert_eq!(payload["func"], "send_email");
    assert_eq!(payload["args"][0], "kelly@example.com");
    assert_eq!(payload["kwargs"]["subject"], "hi");
}

#[test]
fn job_call_parses_minimal_payload() {
    // args and kwargs are optional on the wire.
    let call = JobCall::parse(&json!({"func": "noop"})).unwrap();
    assert_eq!(call.func, "noop");
    assert!(call.args.is_empty());
    assert!(call.kwargs.is_empty());
}

#[test]
fn job_call_rejects_payload_without_func() {
    assert!(JobCall::parse(&json!({"args": [1, 2]})).is_err());
    assert!(JobCall::parse(&json!("not an object")).is_err());
}

#[test]
fn job_report_success_and_failure_shapes() {
    let ok: serde_json::Value = JobReport::success(json!(7)).into();
    assert_eq!(ok["result"], 7);
    assert_eq!(ok["exc"], serde_json::Value::Null);

    let err = JobReport::failure("boom");
    assert!(err.is_failure());
    let err: serde_json::Value = err.into();
    assert_eq!(err["result"], serde_json::Value::Null);
    assert_eq!(err["exc"], "boom");
}
