//! Core data model.
//!
//! A job is one row in the `job` table. Its lifecycle state is never stored:
//! it is derived from the timestamp and counter fields, so a row can never
//! disagree with its own state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job row. The sole entity of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier.
    pub id: JobId,

    /// Logical partition. Workers claim from a set of queues.
    pub queue: String,

    pub created_at: DateTime<Utc>,

    /// Earliest instant the job may be claimed. Pushed forward on retry
    /// and release.
    pub delayed_until: DateTime<Utc>,

    /// Set while a worker holds the job; `None` means not currently held.
    pub started_at: Option<DateTime<Utc>>,

    /// Set when a terminal result is recorded.
    pub ended_at: Option<DateTime<Utc>>,

    /// Remaining attempts. Decremented on each failure; at zero the job is
    /// buried and no claim will ever select it again.
    pub tries: i32,

    /// Backoff in seconds applied by `fail` before the next attempt.
    pub retry_delay: i32,

    /// Execution deadline in seconds. Stored with the job and enforced by
    /// the worker runtime, never by the reservation engine.
    pub timeout: i32,

    /// Identity of the holding worker while reserved.
    pub worker_id: Option<String>,

    /// Opaque execution descriptor. The engine never interprets it.
    pub payload: serde_json::Value,

    /// Opaque outcome, success value or failure detail. `None` until some
    /// attempt reports back.
    pub result: Option<serde_json::Value>,
}

impl Job {
    /// Derive the lifecycle state at `now`.
    ///
    /// This is the crate's one definition of job state; the SQL behind
    /// `queue_size` and `list_jobs` mirrors it branch for branch.
    pub fn state_at(&self, now: DateTime<Utc>) -> JobState {
        if self.started_at.is_none() {
            if self.tries <= 0 {
                JobState::Failed
            } else if now < self.delayed_until {
                JobState::Delayed
            } else {
                JobState::Ready
            }
        } else if self.result.is_none() {
            JobState::Reserved
        } else {
            JobState::Finished
        }
    }
}

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of a job, derived from its row fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting out its `delayed_until`; will become ready on its own.
    Delayed,
    /// Eligible for claiming.
    Ready,
    /// Held by a worker; no outcome reported yet.
    Reserved,
    /// A terminal result has been recorded.
    Finished,
    /// Retry budget exhausted; buried until manually released.
    Failed,
}

impl JobState {
    /// All states, in histogram order.
    pub const ALL: [JobState; 5] = [
        JobState::Delayed,
        JobState::Ready,
        JobState::Reserved,
        JobState::Finished,
        JobState::Failed,
    ];
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Delayed => "delayed",
            JobState::Ready => "ready",
            JobState::Reserved => "reserved",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delayed" => Ok(JobState::Delayed),
            "ready" => Ok(JobState::Ready),
            "reserved" => Ok(JobState::Reserved),
            "finished" => Ok(JobState::Finished),
            "failed" => Ok(JobState::Failed),
            other => Err(Error::Other(format!("unknown job state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for enqueuing jobs. Defaults mirror the column defaults in the
/// schema, so rows inserted out of band behave identically.
pub struct NewJob {
    pub(crate) queue: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) tries: i32,
    pub(crate) retry_delay: i32,
    pub(crate) timeout: i32,
    pub(crate) delay: i32,
}

impl NewJob {
    pub fn new(queue: impl Into<String>, payload: impl Into<serde_json::Value>) -> Self {
        Self {
            queue: queue.into(),
            payload: payload.into(),
            tries: 3,
            retry_delay: 60,
            timeout: 300,
            delay: 0,
        }
    }

    /// Attempt budget before the job is buried.
    pub fn tries(mut self, n: i32) -> Self {
        self.tries = n;
        self
    }

    /// Backoff in seconds between failed attempts.
    pub fn retry_delay(mut self, seconds: i32) -> Self {
        self.retry_delay = seconds;
        self
    }

    /// Execution deadline in seconds, enforced by the worker runtime.
    pub fn timeout(mut self, seconds: i32) -> Self {
        self.timeout = seconds;
        self
    }

    /// Schedule the first attempt `seconds` into the future.
    pub fn delay(mut self, seconds: i32) -> Self {
        self.delay = seconds;
        self
    }
}

// ---------------------------------------------------------------------------
// Worker payload conventions
// ---------------------------------------------------------------------------

/// The payload shape the worker runtime understands: a handler name plus
/// positional and keyword arguments. The reservation engine itself never
/// looks inside payloads; this convention lives entirely on the worker side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCall {
    pub func: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, serde_json::Value>,
}

impl JobCall {
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            args: Vec::new(),
            kwargs: serde_json::Map::new(),
        }
    }

    pub fn arg(mut self, value: serde_json::Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Parse a stored payload. Fails if `func` is missing or the payload is
    /// not an object.
    pub fn parse(payload: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(payload.clone()).map_err(|e| Error::Payload(e.to_string()))
    }
}

impl From<JobCall> for serde_json::Value {
    fn from(call: JobCall) -> Self {
        serde_json::json!({
            "func": call.func,
            "args": call.args,
            "kwargs": call.kwargs,
        })
    }
}

/// Outcome the worker runtime records into `result`: a success value or the
/// failure detail under `exc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub result: Option<serde_json::Value>,
    pub exc: Option<String>,
}

impl JobReport {
    pub fn success(value: serde_json::Value) -> Self {
        Self {
            result: Some(value),
            exc: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            result: None,
            exc: Some(detail.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.exc.is_some()
    }
}

impl From<JobReport> for serde_json::Value {
    fn from(report: JobReport) -> Self {
        serde_json::json!({
            "result": report.result,
            "exc": report.exc,
        })
    }
}
