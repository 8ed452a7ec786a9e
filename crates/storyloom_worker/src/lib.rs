//! The worker process: connects to the coordinator over the
//! Split Plane Protocol, executes dispatched book-processing jobs chapter
//! by chapter through `storyloom_pipeline`, and reports back.

pub mod cancel;
pub mod heuristic_processor;
pub mod worker;

pub use cancel::CancellationToken;
pub use heuristic_processor::HeuristicProcessor;
pub use worker::{Worker, WorkerConfig, WorkerError};

#[derive(clap::Parser, Debug, Clone)]
#[command(name = "storyloom-worker", about = "Book processing orchestrator worker")]
pub struct WorkerArgs {
    /// Coordinator address to connect to.
    #[arg(
        long,
        default_value_t = storyloom_protocol::defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string()
    )]
    pub connect: String,

    /// Database URL (sqlite:// or postgres://).
    #[arg(long, default_value = "sqlite://storyloom.db")]
    pub database: String,

    /// Worker ID (auto-generated if not provided).
    #[arg(long)]
    pub worker_id: Option<String>,

    /// Queues this worker accepts jobs from, e.g.
    /// `orchestrator worker --queues heavy,normal,light`.
    #[arg(long, value_delimiter = ',', default_value = "normal")]
    pub queues: Vec<String>,

    /// Declared concurrency this worker advertises at handshake. The
    /// execution model itself remains one job at a time per connection
    ///; this only affects how many workers the operator spins
    /// up, not per-process fan-out.
    #[arg(long, default_value_t = 1)]
    pub concurrency: u32,
}
