//! drudge CLI — worker daemon and operator interface to the job queue.

use clap::{Parser, Subcommand};
use drudge_rs::config::Config;
use drudge_rs::db::Db;
use drudge_rs::model::{JobCall, JobId, JobState, NewJob};
use drudge_rs::telemetry::{TelemetryConfig, init_telemetry};
use drudge_rs::worker::handler::{ExecHandler, HandlerRegistry};
use drudge_rs::worker::{Worker, WorkerConfig, default_worker_id};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "drudge", about = "Postgres-backed durable job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker daemon
    Serve {
        /// Queue to claim from (repeat for several)
        #[arg(long = "queue", default_value = "default")]
        queues: Vec<String>,
        /// Worker identity; defaults to the hostname
        #[arg(long)]
        worker_id: Option<String>,
        /// Maximum concurrent jobs
        #[arg(long, default_value_t = 4)]
        concurrency: usize,
        /// Claim cadence in seconds when no notify arrives
        #[arg(long, default_value_t = 5)]
        poll_interval: u64,
        /// Lost-job reconcile cadence in seconds
        #[arg(long, default_value_t = 60)]
        reconcile_interval: u64,
    },
    /// Job operations
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Queue operations
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Submit a new job
    Submit {
        /// Function name the worker dispatches on
        func: String,
        /// Positional arguments; parsed as JSON, bare strings pass through
        args: Vec<String>,
        /// Keyword argument as KEY=VALUE; repeat for several
        #[arg(long = "kwarg")]
        kwargs: Vec<String>,
        /// Target queue
        #[arg(long, default_value = "default")]
        queue: String,
        /// Attempts allowed before the job is buried
        #[arg(long, default_value_t = 3)]
        tries: i32,
        /// Seconds of backoff between attempts
        #[arg(long, default_value_t = 60)]
        retry_delay: i32,
        /// Execution budget in seconds
        #[arg(long, default_value_t = 300)]
        timeout: i32,
        /// Seconds before the job becomes claimable
        #[arg(long, default_value_t = 0)]
        delay: i32,
    },
    /// List jobs
    List {
        /// Filter by queue
        #[arg(long)]
        queue: Option<String>,
        /// Filter by derived state
        #[arg(long)]
        state: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a job
    Show {
        /// Job ID (full UUID or prefix)
        id: String,
    },
    /// Put a job back on the queue
    Release {
        /// Job ID (full UUID or prefix)
        id: String,
        /// Seconds before it becomes claimable again
        #[arg(long, default_value_t = 0)]
        delay: i32,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Show per-state job counts for a queue
    Size {
        #[arg(default_value = "default")]
        queue: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            queues,
            worker_id,
            concurrency,
            poll_interval,
            reconcile_interval,
        } => {
            cmd_serve(
                queues,
                worker_id,
                concurrency,
                poll_interval,
                reconcile_interval,
            )
            .await
        }
        Command::Job { action } => {
            let config = Config::from_env()?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;

            match action {
                JobAction::Submit {
                    func,
                    args,
                    kwargs,
                    queue,
                    tries,
                    retry_delay,
                    timeout,
                    delay,
                } => {
                    let opts = SubmitOpts {
                        queue,
                        tries,
                        retry_delay,
                        timeout,
                        delay,
                    };
                    cmd_job_submit(&db, func, args, kwargs, opts).await
                }
                JobAction::List {
                    queue,
                    state,
                    limit,
                } => cmd_job_list(&db, queue, state, limit).await,
                JobAction::Show { id } => cmd_job_show(&db, id).await,
                JobAction::Release { id, delay } => cmd_job_release(&db, id, delay).await,
            }
        }
        Command::Queue { action } => {
            let config = Config::from_env()?;
            let db = Db::connect(config.database_url.expose_secret()).await?;
            db.migrate().await?;

            match action {
                QueueAction::Size { queue } => cmd_queue_size(&db, queue).await,
            }
        }
    }
}

async fn cmd_serve(
    queues: Vec<String>,
    worker_id: Option<String>,
    concurrency: usize,
    poll_interval: u64,
    reconcile_interval: u64,
) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "drudge".to_string(),
    })?;

    let db = Db::connect_with_pool_size(
        config.database_url.expose_secret(),
        config.database_pool_size,
    )
    .await?;
    db.migrate().await?;

    let mut registry = HandlerRegistry::new();
    registry.register("exec", Arc::new(ExecHandler));

    let worker = Worker::new(
        Arc::new(db),
        Arc::new(registry),
        WorkerConfig {
            worker_id: worker_id.unwrap_or_else(default_worker_id),
            queues,
            concurrency,
            poll_interval: Duration::from_secs(poll_interval),
            reconcile_interval: Duration::from_secs(reconcile_interval),
        },
    );

    let shutdown = worker.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.notify_one();
    });

    worker.run().await?;
    Ok(())
}

struct SubmitOpts {
    queue: String,
    tries: i32,
    retry_delay: i32,
    timeout: i32,
    delay: i32,
}

async fn cmd_job_submit(
    db: &Db,
    func: String,
    args: Vec<String>,
    kwargs: Vec<String>,
    opts: SubmitOpts,
) -> anyhow::Result<()> {
    let mut call = JobCall::new(&func);
    for raw in &args {
        call = call.arg(parse_json_or_string(raw));
    }
    for raw in &kwargs {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--kwarg expects KEY=VALUE, got '{raw}'"))?;
        call = call.kwarg(key, parse_json_or_string(value));
    }

    let new = NewJob::new(&opts.queue, call)
        .tries(opts.tries)
        .retry_delay(opts.retry_delay)
        .timeout(opts.timeout)
        .delay(opts.delay);

    let job = db.enqueue(new).await?;
    println!(
        "Enqueued: {} (queue: {}, state: {})",
        job.id,
        job.queue,
        job.state_at(chrono::Utc::now())
    );
    Ok(())
}

/// JSON if it parses, bare string otherwise, so `submit add 2 3` and
/// `submit greet hello` both do the obvious thing.
fn parse_json_or_string(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn cmd_job_list(
    db: &Db,
    queue: Option<String>,
    state: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let state_filter: Option<JobState> = match state {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid state: {s}"))?,
        ),
        None => None,
    };

    let jobs = db.list_jobs(queue.as_deref(), state_filter, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    let now = chrono::Utc::now();

    // Header
    println!(
        "{:<8}  {:<12}  {:<10}  {:<5}  {:<16}  FUNC",
        "ID", "QUEUE", "STATE", "TRIES", "CREATED"
    );
    println!("{}", "-".repeat(80));

    for job in &jobs {
        let func = JobCall::parse(&job.payload)
            .map(|call| call.func)
            .unwrap_or_else(|_| "?".to_string());
        println!(
            "{:<8}  {:<12}  {:<10}  {:<5}  {:<16}  {}",
            job.id,
            job.queue,
            job.state_at(now),
            job.tries,
            job.created_at.format("%Y-%m-%d %H:%M"),
            func
        );
    }

    println!("\n{} job(s)", jobs.len());
    Ok(())
}

async fn cmd_job_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    let id = resolve_job_id(db, &id_str).await?;
    let job = db.get_job(id).await?;

    println!("ID:            {}", job.id.0);
    println!("Queue:         {}", job.queue);
    println!("State:         {}", job.state_at(chrono::Utc::now()));
    println!("Tries left:    {}", job.tries);
    println!("Retry delay:   {}s", job.retry_delay);
    println!("Timeout:       {}s", job.timeout);
    println!("Created:       {}", job.created_at);
    println!("Delayed until: {}", job.delayed_until);
    if let Some(started) = job.started_at {
        println!("Started:       {started}");
    }
    if let Some(ended) = job.ended_at {
        println!("Ended:         {ended}");
    }
    if let Some(ref worker) = job.worker_id {
        println!("Worker:        {worker}");
    }
    println!("Payload:       {}", serde_json::to_string_pretty(&job.payload)?);
    if let Some(ref result) = job.result {
        println!("Result:        {}", serde_json::to_string_pretty(result)?);
    }

    Ok(())
}

async fn cmd_job_release(db: &Db, id_str: String, delay: i32) -> anyhow::Result<()> {
    let id = resolve_job_id(db, &id_str).await?;
    let job = db.release(id, delay).await?;
    println!(
        "Released: {} (state: {})",
        job.id,
        job.state_at(chrono::Utc::now())
    );
    Ok(())
}

async fn cmd_queue_size(db: &Db, queue: String) -> anyhow::Result<()> {
    let sizes = db.queue_size(&queue).await?;

    println!("Queue: {queue}");
    for (state, count) in &sizes {
        println!("  {state:<9} {count}");
    }
    Ok(())
}

/// Resolve a full UUID or a unique prefix to a job id.
async fn resolve_job_id(db: &Db, id_str: &str) -> anyhow::Result<JobId> {
    if id_str.len() < 36 {
        let jobs = db.list_jobs(None, None, 100).await?;
        let matches: Vec<_> = jobs
            .iter()
            .filter(|job| job.id.0.to_string().starts_with(id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no job matching prefix '{id_str}'"),
            1 => Ok(matches[0].id),
            n => anyhow::bail!("{n} jobs match prefix '{id_str}' — be more specific"),
        }
    } else {
        Ok(JobId(uuid::Uuid::parse_str(id_str)?))
    }
}
