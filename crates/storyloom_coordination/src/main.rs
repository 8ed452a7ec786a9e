//! Standalone coordination binary: admission control + dispatch loop +
//! the Split Plane Protocol listener, for running the coordinator apart
//! from the `storyloom` CLI's `serve` subcommand.

use clap::Parser;
use storyloom_coordination::{
    AdmissionConfig, AdmissionControl, CoordinationServer, Dispatcher, InMemoryStore, JobQueue,
    SysinfoSampler,
};
use storyloom_db::pool::{create_pool, DbConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "storyloom-coordinator", about = "Book processing orchestrator coordinator")]
struct Args {
    #[arg(long, default_value_t = storyloom_protocol::defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string())]
    bind: String,

    #[arg(long, default_value = "sqlite://storyloom.db")]
    database: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storyloom_coordination=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!(bind = %args.bind, database = %args.database, "starting storyloom coordinator");

    let pool = create_pool(DbConfig::from_url(&args.database)?).await?;
    let queue = JobQueue::new(pool.clone());
    let admission = AdmissionControl::new(
        InMemoryStore::new(),
        SysinfoSampler::new(),
        JobQueue::new(pool),
        AdmissionConfig::default(),
    );

    let mut dispatcher = Dispatcher::new(
        queue,
        admission,
        std::time::Duration::from_secs(storyloom_protocol::defaults::DEFAULT_WAKE_TICK_SECONDS),
        std::time::Duration::from_secs(storyloom_protocol::defaults::DEFAULT_QUEUE_TIMEOUT_SECONDS),
    );

    let server_pool = create_pool(DbConfig::from_url(&args.database)?).await?;
    let mut server = CoordinationServer::bind(&args.bind, JobQueue::new(server_pool)).await?;

    // One loop, not two: dispatching a job needs `&mut server` to look up
    // an idle worker and send it, so the wake-tick and the control-plane
    // recv share a single select rather than racing over the socket.
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
        }
    }
}
