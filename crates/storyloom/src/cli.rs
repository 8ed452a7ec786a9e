//! CLI surface: `storyloom {serve, worker, enqueue, cancel, stats}`.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "storyloom", about = "Book processing orchestrator", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Database URL (sqlite:// or postgres://), shared by every subcommand.
    #[arg(long, global = true, default_value = "sqlite://storyloom.db")]
    pub database: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run admission + dispatch + the control-plane listener, with an
    /// optional pool of in-process workers.
    Serve {
        /// Address to bind the Split Plane Protocol listener on.
        #[arg(long, default_value_t = storyloom_protocol::defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string())]
        bind: String,

        /// Number of in-process workers to spawn alongside the coordinator.
        /// Zero means operators run `storyloom worker` as separate
        /// processes instead.
        #[arg(long, default_value_t = 0)]
        workers: u32,

        /// Queues the in-process workers accept from, if `--workers` > 0.
        #[arg(long, value_delimiter = ',', default_value = "normal")]
        queues: Vec<String>,
    },

    /// Run a single worker process against a running coordinator.
    Worker {
        #[arg(long, default_value_t = storyloom_protocol::defaults::DEFAULT_SENTINEL_BIND_ADDR.to_string())]
        connect: String,

        #[arg(long)]
        worker_id: Option<String>,

        #[arg(long, value_delimiter = ',', default_value = "normal")]
        queues: Vec<String>,

        #[arg(long, default_value_t = 1)]
        concurrency: u32,
    },

    /// Submit a book already persisted in the database for processing.
    Enqueue {
        #[arg(long = "book")]
        book_id: String,

        #[arg(long = "user")]
        user_id: String,

        /// 1 = highest priority, 10 = lowest.
        #[arg(long, default_value_t = storyloom_coordination::DEFAULT_PRIORITY)]
        priority: i64,
    },

    /// Cancel a queued or running job.
    Cancel {
        #[arg(long = "job")]
        job_id: String,
    },

    /// Print queue and job-state counters.
    Stats,
}
