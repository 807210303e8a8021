//! Worker runtime: claims jobs, runs handlers, records outcomes.
//!
//! The loop follows the queue's delivery model. LISTEN wakes are a latency
//! optimization layered over bounded polling, and a periodic reconcile pass
//! frees jobs still reserved under this worker's identity that no task here
//! is actually running — the leftovers of a crashed predecessor.

pub mod handler;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::db::Db;
use crate::db::listen::JobNotice;
use crate::error::Result;
use crate::model::{Job, JobCall, JobId, JobReport};
use crate::telemetry::job::{record_job_outcome, start_job_span};
use crate::telemetry::metrics;
use handler::HandlerRegistry;

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Reservation identity. Stable across restarts, so recovery can find
    /// the orphans a previous instance left reserved.
    pub worker_id: String,
    /// Queues this worker claims from.
    pub queues: Vec<String>,
    /// Maximum jobs executing at once.
    pub concurrency: usize,
    /// Claim cadence when no notify arrives.
    pub poll_interval: Duration,
    /// Cadence of the lost-job reconcile pass.
    pub reconcile_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            queues: vec!["default".to_string()],
            concurrency: 4,
            poll_interval: Duration::from_secs(5),
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

/// Hostname of this machine, the conventional stable worker identity.
pub fn default_worker_id() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// The worker loop: wake on notify, poll as fallback, reconcile on a timer.
pub struct Worker {
    db: Arc<Db>,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl Worker {
    pub fn new(db: Arc<Db>, registry: Arc<HandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            db,
            registry,
            config,
            shutdown: Arc::new(Notify::new()),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Signal the run loop to stop claiming and return.
    ///
    /// In-flight jobs keep running on their own tasks. If the process exits
    /// before they record an outcome, the rows stay reserved and the next
    /// start's reconcile pass returns them to the queue.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Handle for signalling shutdown from another task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Run the claim/execute/record loop until shutdown is signalled.
    pub async fn run(&self) -> Result<()> {
        let mut listener = self.db.listen().await?;

        // The interval's immediate first tick doubles as the startup
        // recovery pass.
        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);

        info!(
            worker_id = %self.config.worker_id,
            queues = ?self.config.queues,
            concurrency = self.config.concurrency,
            "worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                _ = reconcile.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!("reconcile error: {e}");
                    }
                }
                notice = listener.recv() => {
                    match notice {
                        Ok(notice) => {
                            if let Err(e) = self.claim_notified(notice).await {
                                error!("claim error: {e}");
                            }
                        }
                        Err(e) => {
                            warn!("listener error, falling back to poll: {e}");
                            if let Err(e) = self.claim_ready().await {
                                error!("claim error: {e}");
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.claim_ready().await {
                        error!("claim error: {e}");
                    }
                }
            }
        }
    }

    /// React to a wake hint: claim that specific job if this worker serves
    /// its queue, is not already running it, and has a free slot.
    async fn claim_notified(&self, notice: JobNotice) -> Result<()> {
        if !self.config.queues.contains(&notice.queue) {
            return Ok(());
        }
        if self.free_slots() == 0 || self.is_active(notice.id) {
            return Ok(());
        }

        if let Some(job) = self.db.claim_one(notice.id, &self.config.worker_id).await? {
            self.spawn_job(job);
        }
        Ok(())
    }

    /// Poll path: fill every free slot from the subscribed queues.
    async fn claim_ready(&self) -> Result<()> {
        let free = self.free_slots();
        if free == 0 {
            return Ok(());
        }

        let jobs = self
            .db
            .claim_batch(&self.config.queues, &self.config.worker_id, free as i64)
            .await?;
        for job in jobs {
            self.spawn_job(job);
        }
        Ok(())
    }

    /// Free jobs reserved under this identity that no task here holds.
    async fn reconcile(&self) -> Result<()> {
        let held: Vec<JobId> = lock(&self.active).iter().copied().collect();

        let released = self
            .db
            .release_lost(&self.config.worker_id, &self.config.queues, &held)
            .await?;
        if !released.is_empty() {
            info!(count = released.len(), "released lost jobs");
        }
        Ok(())
    }

    /// Run one claimed job on its own task, bounded by the job's timeout.
    /// The id goes into the active set before the task spawns, so the
    /// reconcile pass never mistakes a just-claimed job for a lost one.
    fn spawn_job(&self, job: Job) {
        lock(&self.active).insert(job.id);

        let db = Arc::clone(&self.db);
        let registry = Arc::clone(&self.registry);
        let active = Arc::clone(&self.active);

        tokio::spawn(async move {
            let id = job.id;
            if let Err(e) = execute_job(&db, &registry, job).await {
                error!(job_id = %id, "record outcome error: {e}");
            }
            lock(&active).remove(&id);
        });
    }

    fn free_slots(&self) -> usize {
        self.config.concurrency.saturating_sub(lock(&self.active).len())
    }

    fn is_active(&self, id: JobId) -> bool {
        lock(&self.active).contains(&id)
    }
}

fn lock(set: &Mutex<HashSet<JobId>>) -> MutexGuard<'_, HashSet<JobId>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Execute a claimed job and record its outcome. Handler failures are
/// recorded as failed attempts; only recording errors come back as `Err`.
async fn execute_job(db: &Db, registry: &HandlerRegistry, job: Job) -> Result<()> {
    let job_span = start_job_span(&job.queue, &job.id);

    async {
        let started = Instant::now();

        let call = match JobCall::parse(&job.payload) {
            Ok(call) => call,
            Err(e) => {
                warn!(job_id = %job.id, "unparseable payload: {e}");
                record_job_outcome(&job_span, "retried");
                let report: serde_json::Value = JobReport::failure(e.to_string()).into();
                db.fail(job.id, &report).await?;
                return Ok(());
            }
        };

        let Some(handler) = registry.get(&call.func) else {
            warn!(job_id = %job.id, func = %call.func, "no handler for function");
            record_job_outcome(&job_span, "retried");
            let report: serde_json::Value =
                JobReport::failure(format!("unknown function: {}", call.func)).into();
            db.fail(job.id, &report).await?;
            return Ok(());
        };

        info!(job_id = %job.id, queue = %job.queue, func = %call.func, "job started");

        let budget = Duration::from_secs(job.timeout.max(0) as u64);
        let outcome = tokio::time::timeout(budget, handler.run(&job, &call)).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::job_duration_ms().record(duration_ms, &[KeyValue::new("func", call.func.clone())]);

        match outcome {
            Ok(Ok(value)) => {
                info!(job_id = %job.id, duration_ms, "job finished");
                record_job_outcome(&job_span, "finished");
                let report: serde_json::Value = JobReport::success(value).into();
                db.finish(job.id, &report).await?;
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.id, duration_ms, "job failed: {e}");
                record_job_outcome(&job_span, "retried");
                let report: serde_json::Value = JobReport::failure(e.to_string()).into();
                db.fail(job.id, &report).await?;
            }
            Err(_) => {
                warn!(job_id = %job.id, duration_ms, timeout_s = job.timeout, "job timed out");
                record_job_outcome(&job_span, "timed_out");
                let report: serde_json::Value =
                    JobReport::failure(format!("timed out after {}s", job.timeout)).into();
                db.fail(job.id, &report).await?;
            }
        }

        Ok(())
    }
    .instrument(job_span.clone())
    .await
}
