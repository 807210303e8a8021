//! Handler dispatch: how a claimed job's payload becomes work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Job, JobCall};

/// Type-erased handler for one function name.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the call and produce the value stored as the job's result.
    ///
    /// An `Err` is recorded as a failed attempt: the job goes back to the
    /// queue with one fewer try and `retry_delay` seconds of backoff.
    async fn run(&self, job: &Job, call: &JobCall) -> Result<serde_json::Value>;
}

/// Maps a payload's `func` name to the handler that executes it.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under a function name. Re-registering replaces.
    pub fn register(&mut self, func: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(func.into(), handler);
    }

    /// Register a plain async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, func: impl Into<String>, f: F)
    where
        F: Fn(JobCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.handlers.insert(func.into(), Arc::new(FnHandler(f)));
    }

    pub fn get(&self, func: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(func).cloned()
    }

    /// All registered function names.
    pub fn registered(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    async fn run(&self, _job: &Job, call: &JobCall) -> Result<serde_json::Value> {
        (self.0)(call.clone()).await
    }
}

/// Runs an operating-system command: the call's positional arguments are
/// the argv, stdout becomes the result. Registered as `exec` by default.
pub struct ExecHandler;

#[async_trait]
impl JobHandler for ExecHandler {
    async fn run(&self, job: &Job, call: &JobCall) -> Result<serde_json::Value> {
        let mut argv = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            match arg.as_str() {
                Some(s) => argv.push(s.to_string()),
                None => {
                    return Err(Error::Payload(format!(
                        "exec args must be strings, got {arg}"
                    )));
                }
            }
        }
        let (program, rest) = argv
            .split_first()
            .ok_or_else(|| Error::Payload("exec needs at least a program name".to_string()))?;

        debug!(job_id = %job.id, program, "exec handler spawning");

        let output = Command::new(program)
            .args(rest)
            .env("DRUDGE_JOB_ID", job.id.0.to_string())
            .env("DRUDGE_QUEUE", &job.queue)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::Other(format!(
                "exec exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(serde_json::Value::String(
            String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn register_fn_dispatches_by_name() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("double", |call: JobCall| async move {
            let n = call.args[0].as_i64().unwrap_or(0);
            Ok(json!(n * 2))
        });

        assert!(registry.get("double").is_some());
        assert!(registry.get("triple").is_none());
        assert_eq!(registry.registered(), vec!["double".to_string()]);
    }
}
