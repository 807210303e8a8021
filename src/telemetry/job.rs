//! Job execution span helpers.
//!
//! Span fields follow the OTel messaging semantic conventions so traces
//! line up with other queue consumers in the same collector.

use tracing::Span;

use crate::model::JobId;

/// Start a span covering one execution attempt of a claimed job.
///
/// The `job.outcome` field is declared empty and filled in by
/// [`record_job_outcome`] once the attempt resolves.
pub fn start_job_span(queue: &str, job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.execute",
        "messaging.destination.name" = queue,
        "messaging.message.id" = %job_id,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record how the attempt resolved ("finished", "retried", "timed_out").
pub fn record_job_outcome(span: &Span, outcome: &str) {
    span.record("job.outcome", outcome);
}
