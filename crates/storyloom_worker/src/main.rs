//! Standalone worker binary: connects to a running coordinator and
//! processes dispatched jobs until told to recycle. The
//! `storyloom worker` subcommand on the unified CLI wraps this same
//! `Worker`/`WorkerConfig` pair; this binary exists for operators who run
//! worker processes as their own deployable unit, separate from the
//! coordinator binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use uuid::Uuid;

use storyloom_coordination::SysinfoSampler;
use storyloom_db::pool::{create_pool, DbConfig};
use storyloom_logging::{init_logging, LogConfig};
use storyloom_pipeline::image_dispatch::NullSink;
use storyloom_pipeline::{DescriptionPipeline, PipelineConfig, ProcessorRegistry};
use storyloom_protocol::config::OrchestratorConfig;
use storyloom_worker::{HeuristicProcessor, Worker, WorkerArgs, WorkerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let args = WorkerArgs::parse();

    if let Err(err) = init_logging(LogConfig { app_name: "storyloom-worker", verbose: false, tui_mode: false }) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(1);
    }

    let worker_id = args.worker_id.clone().unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

    let db_config = match DbConfig::from_url(&args.database) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::error!(error = %err, "invalid database url");
            return ExitCode::from(1);
        }
    };
    let pool = match create_pool(db_config).await {
        Ok(pool) => pool,
        Err(err) => {
            tracing::error!(error = %err, "failed to open database");
            return ExitCode::from(1);
        }
    };

    let orchestrator_config = OrchestratorConfig::from_env();
    let worker_config = WorkerConfig::from_orchestrator_config(
        args.connect.clone(),
        worker_id,
        args.queues.clone(),
        args.concurrency,
        &orchestrator_config,
    );

    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(HeuristicProcessor), None);

    let pipeline_config = PipelineConfig {
        max_parallel_processors: orchestrator_config.max_parallel_processors,
        skip_service_pages: orchestrator_config.skip_service_pages,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(DescriptionPipeline::new(
        registry,
        orchestrator_config.consensus_threshold,
        Arc::new(NullSink),
        pipeline_config,
    ));

    let resources = Arc::new(SysinfoSampler::new());

    let mut worker = match Worker::connect(worker_config, pool, pipeline, resources).await {
        Ok(worker) => worker,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect to coordinator");
            return ExitCode::from(1);
        }
    };

    match worker.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "worker exited with error");
            ExitCode::from(1)
        }
    }
}
