//! Metric instrument factories for drudge-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"drudge-rs"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for drudge-rs instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("drudge-rs")
}

/// Counter: jobs inserted.
/// Labels: `queue`.
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("drudge.jobs.enqueued")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: jobs claimed for execution.
/// Labels: `mode` ("batch" | "single").
pub fn jobs_claimed() -> Counter<u64> {
    meter()
        .u64_counter("drudge.jobs.claimed")
        .with_description("Number of jobs claimed")
        .build()
}

/// Counter: recorded attempt outcomes.
/// Labels: `outcome` ("finished" | "retried" | "buried").
pub fn job_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("drudge.jobs.outcomes")
        .with_description("Number of recorded job outcomes")
        .build()
}

/// Counter: reservations handed back without an outcome.
/// Labels: `reason` ("manual" | "lost").
pub fn jobs_released() -> Counter<u64> {
    meter()
        .u64_counter("drudge.jobs.released")
        .with_description("Number of jobs released back to the queue")
        .build()
}

/// Histogram: handler execution duration in milliseconds.
/// Labels: `func`.
pub fn job_duration_ms() -> Histogram<u64> {
    meter()
        .u64_histogram("drudge.job.duration_ms")
        .with_description("Job handler execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
