//! Unified CLI binary: `storyloom {serve, worker, enqueue,
//! cancel, stats}`.
//!
//! `serve` and `worker` share the same admission/dispatch/worker-execution
//! plumbing as the standalone `storyloom-coordinator` and `storyloom-worker`
//! binaries (`storyloom_coordination`/`storyloom_worker`'s own `main.rs`);
//! this binary is the single entry point most operators run, with the
//! split-process binaries available for deployments that want the
//! coordinator and workers as separate units.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use comfy_table::Table;

use cli::{Cli, Command};
use storyloom_coordination::{
    AdmissionConfig, AdmissionControl, CoordinationServer, Dispatcher, InMemoryStore, JobQueue,
    SysinfoSampler,
};
use storyloom_db::pool::{create_pool, DbConfig};
use storyloom_logging::{init_logging, LogConfig};
use storyloom_pipeline::image_dispatch::NullSink;
use storyloom_pipeline::{DescriptionPipeline, PipelineConfig, ProcessorRegistry};
use storyloom_protocol::config::OrchestratorConfig;
use storyloom_worker::{HeuristicProcessor, Worker, WorkerConfig};

/// Exit codes: 0 success, 1 config error, 2 coordination
/// store unreachable, 3 DB unreachable, 4 runtime fatal.
enum CliError {
    Config(String),
    CoordinationUnavailable(String),
    Db(String),
    Fatal(String),
}

impl CliError {
    fn code(&self) -> u8 {
        match self {
            CliError::Config(_) => 1,
            CliError::CoordinationUnavailable(_) => 2,
            CliError::Db(_) => 3,
            CliError::Fatal(_) => 4,
        }
    }

    fn message(&self) -> &str {
        match self {
            CliError::Config(m) | CliError::CoordinationUnavailable(m) | CliError::Db(m) | CliError::Fatal(m) => m,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig { app_name: "storyloom", verbose: false, tui_mode: false }) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(1);
    }

    let result = match cli.command {
        Command::Serve { bind, workers, queues } => run_serve(&cli.database, &bind, workers, queues).await,
        Command::Worker { connect, worker_id, queues, concurrency } => {
            run_worker(&cli.database, &connect, worker_id, queues, concurrency).await
        }
        Command::Enqueue { book_id, user_id, priority } => run_enqueue(&cli.database, &book_id, &user_id, priority).await,
        Command::Cancel { job_id } => run_cancel(&cli.database, &job_id).await,
        Command::Stats => run_stats(&cli.database).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err.message(), "storyloom command failed");
            ExitCode::from(err.code())
        }
    }
}

fn db_config(database: &str) -> Result<DbConfig, CliError> {
    DbConfig::from_url(database).map_err(|e| CliError::Config(e.to_string()))
}

async fn open_pool(database: &str) -> Result<storyloom_db::DbPool, CliError> {
    create_pool(db_config(database)?).await.map_err(|e| CliError::Db(e.to_string()))
}

fn build_pipeline(config: &OrchestratorConfig) -> Arc<DescriptionPipeline> {
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(HeuristicProcessor), None);

    let pipeline_config = PipelineConfig {
        max_parallel_processors: config.max_parallel_processors,
        skip_service_pages: config.skip_service_pages,
        ..PipelineConfig::default()
    };
    Arc::new(DescriptionPipeline::new(
        registry,
        config.consensus_threshold,
        Arc::new(NullSink),
        pipeline_config,
    ))
}

async fn run_serve(database: &str, bind: &str, workers: u32, queues: Vec<String>) -> Result<(), CliError> {
    let orchestrator_config = OrchestratorConfig::from_env();

    let dispatch_pool = open_pool(database).await?;
    let queue = JobQueue::new(dispatch_pool.clone());
    let admission = AdmissionControl::new(
        InMemoryStore::new(),
        SysinfoSampler::new(),
        JobQueue::new(dispatch_pool.clone()),
        AdmissionConfig {
            max_concurrent_global: orchestrator_config.max_concurrent_global,
            max_concurrent_per_user: orchestrator_config.max_concurrent_per_user,
            cooldown: Duration::from_secs(orchestrator_config.cooldown_seconds_per_book),
            max_memory_percent: orchestrator_config.max_memory_percent,
            max_cpu_percent: orchestrator_config.max_cpu_percent,
            min_free_memory_mb: orchestrator_config.min_free_memory_mb,
        },
    );

    let mut dispatcher = Dispatcher::new(
        queue,
        admission,
        Duration::from_secs(orchestrator_config.wake_tick_seconds),
        Duration::from_secs(orchestrator_config.queue_timeout_seconds),
    );

    let server_pool = open_pool(database).await?;
    let stuck_sweep_pool = server_pool.clone();
    let mut server = CoordinationServer::bind(bind, JobQueue::new(server_pool))
        .await
        .map_err(|e| CliError::Fatal(e.to_string()))?;

    for i in 0..workers {
        let worker_config = WorkerConfig::from_orchestrator_config(
            bind.to_string(),
            format!("embedded-worker-{i}"),
            queues.clone(),
            1,
            &orchestrator_config,
        );
        let worker_pool = open_pool(database).await?;
        let pipeline = build_pipeline(&orchestrator_config);
        let resources = Arc::new(SysinfoSampler::new());
        tokio::spawn(async move {
            match Worker::connect(worker_config, worker_pool, pipeline, resources).await {
                Ok(mut worker) => {
                    if let Err(err) = worker.run().await {
                        tracing::error!(error = %err, "embedded worker exited");
                    }
                }
                Err(err) => tracing::error!(error = %err, "embedded worker failed to connect"),
            }
        });
    }

    let stuck_job_queue = JobQueue::new(stuck_sweep_pool);
    let sweep_interval = Duration::from_secs(orchestrator_config.stuck_job_sweep_seconds);
    let mut sweep_tick = tokio::time::interval(sweep_interval);

    tracing::info!(bind, workers, "storyloom coordinator listening");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(dispatcher.wait_duration()) => {
                dispatcher.tick(&mut server).await;
            }
            recv = server.recv_one() => {
                if let Err(err) = recv {
                    tracing::warn!(error = %err, "coordination server recv error");
                }
                server.reap_stale_workers();
            }
            _ = sweep_tick.tick() => {
                sweep_stuck_jobs(&stuck_job_queue, orchestrator_config.hard_time_limit_seconds as i64).await;
            }
        }
    }
}

/// Jobs stuck `running` past the hard time limit with no conclude ever
/// arriving (worker crash, network partition) are requeued rather than
/// left orphaned.
async fn sweep_stuck_jobs(queue: &JobQueue, older_than_seconds: i64) {
    match queue.find_stuck_jobs(older_than_seconds).await {
        Ok(stuck) => {
            for job in stuck {
                tracing::warn!(job_id = %job.id, "requeueing stuck job");
                if let Err(err) = queue.requeue_job(&job.id, "stuck job sweep: no conclude received").await {
                    tracing::warn!(job_id = %job.id, error = %err, "failed to requeue stuck job");
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "stuck job sweep query failed"),
    }
}

async fn run_worker(
    database: &str,
    connect: &str,
    worker_id: Option<String>,
    queues: Vec<String>,
    concurrency: u32,
) -> Result<(), CliError> {
    let pool = open_pool(database).await?;
    let orchestrator_config = OrchestratorConfig::from_env();
    let worker_id = worker_id.unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

    let worker_config = WorkerConfig::from_orchestrator_config(connect.to_string(), worker_id, queues, concurrency, &orchestrator_config);
    let pipeline = build_pipeline(&orchestrator_config);
    let resources = Arc::new(SysinfoSampler::new());

    let mut worker = Worker::connect(worker_config, pool, pipeline, resources)
        .await
        .map_err(|e| CliError::Fatal(e.to_string()))?;

    worker.run().await.map_err(|e| CliError::Fatal(e.to_string()))
}

async fn run_enqueue(database: &str, book_id: &str, user_id: &str, priority: i64) -> Result<(), CliError> {
    let pool = open_pool(database).await?;
    let orchestrator_config = OrchestratorConfig::from_env();

    let queue = JobQueue::new(pool.clone());
    let admission = AdmissionControl::new(
        InMemoryStore::new(),
        SysinfoSampler::new(),
        JobQueue::new(pool),
        AdmissionConfig {
            max_concurrent_global: orchestrator_config.max_concurrent_global,
            max_concurrent_per_user: orchestrator_config.max_concurrent_per_user,
            cooldown: Duration::from_secs(orchestrator_config.cooldown_seconds_per_book),
            max_memory_percent: orchestrator_config.max_memory_percent,
            max_cpu_percent: orchestrator_config.max_cpu_percent,
            min_free_memory_mb: orchestrator_config.min_free_memory_mb,
        },
    );

    let job_id = storyloom_ids::JobId::new().to_string();
    let outcome = storyloom_coordination::submit_book(&admission, &queue, &job_id, book_id, user_id, priority)
        .await
        .map_err(|e| CliError::Db(e.to_string()))?;

    if outcome.accepted {
        match outcome.position {
            Some(position) => println!(
                "accepted job {} (reason: {}, position: {})",
                outcome.job_id.unwrap_or_default(),
                outcome.reason.as_str(),
                position
            ),
            None => println!(
                "accepted job {} (reason: {})",
                outcome.job_id.unwrap_or_default(),
                outcome.reason.as_str()
            ),
        }
        Ok(())
    } else {
        println!("rejected: {}", outcome.reason.as_str());
        Err(CliError::Config(format!("admission rejected: {}", outcome.reason.as_str())))
    }
}

/// Cancels a job still sitting in the queue. A job already `running` is
/// owned by whichever `storyloom serve`/`storyloom worker` process claimed
/// it; this short-lived CLI invocation has no channel back into that
/// process's in-memory worker table, so it can only mark the terminal
/// state here and let the worker's own abort poll (which only fires on a
/// live control-plane message) or the stuck-job sweep reconcile it later.
async fn run_cancel(database: &str, job_id: &str) -> Result<(), CliError> {
    let pool = open_pool(database).await?;
    let queue = JobQueue::new(pool);

    let job = queue.get_job(job_id).await.map_err(|e| CliError::Db(e.to_string()))?;
    match job {
        None => Err(CliError::Config(format!("no such job: {job_id}"))),
        Some(job) if job.state.is_terminal() => {
            println!("job {job_id} already in terminal state");
            Ok(())
        }
        Some(job) if matches!(job.state, storyloom_db::models::ParsingJobState::Running) => {
            println!("job {job_id} is running; cancellation will take effect once the owning coordinator observes it");
            queue.cancel_job(job_id).await.map_err(|e| CliError::Db(e.to_string()))
        }
        Some(_) => queue.cancel_job(job_id).await.map_err(|e| CliError::Db(e.to_string())),
    }
}

async fn run_stats(database: &str) -> Result<(), CliError> {
    let pool = open_pool(database).await?;
    let queue = JobQueue::new(pool);
    let stats = queue.stats().await.map_err(|e| CliError::Db(e.to_string()))?;

    let mut table = Table::new();
    table.set_header(vec!["queued", "running", "succeeded", "failed", "cancelled"]);
    table.add_row(vec![
        stats.queued.to_string(),
        stats.running.to_string(),
        stats.succeeded.to_string(),
        stats.failed.to_string(),
        stats.cancelled.to_string(),
    ]);
    println!("{table}");
    Ok(())
}
