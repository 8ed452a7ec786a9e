//! Canonical default values shared across the coordination/worker/pipeline crates.
//!
//! Every constant here corresponds to a row in the configuration
//! table; `OrchestratorConfig::default()` in [`crate::config`] is the single
//! place these are assembled into one struct.

pub const DEFAULT_SENTINEL_BIND_ADDR: &str = "tcp://127.0.0.1:5575";

pub const DEFAULT_MAX_CONCURRENT_GLOBAL: u32 = 5;
pub const DEFAULT_MAX_CONCURRENT_PER_USER: u32 = 1;
pub const DEFAULT_COOLDOWN_SECONDS_PER_BOOK: u64 = 60;
pub const DEFAULT_QUEUE_TIMEOUT_SECONDS: u64 = 3600;
pub const DEFAULT_AGE_PROMOTION_INTERVAL: u64 = 300;
pub const DEFAULT_SOFT_TIME_LIMIT_SECONDS: u64 = 1500;
pub const DEFAULT_HARD_TIME_LIMIT_SECONDS: u64 = 1800;
pub const DEFAULT_MAX_TASKS_PER_CHILD: u32 = 10;
pub const DEFAULT_MAX_MEMORY_PER_CHILD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_MEMORY_PERCENT: f32 = 85.0;
pub const DEFAULT_MAX_CPU_PERCENT: f32 = 90.0;
pub const DEFAULT_MIN_FREE_MEMORY_MB: u64 = 500;
pub const DEFAULT_MAX_PARALLEL_PROCESSORS: usize = 3;
pub const DEFAULT_CONSENSUS_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IMAGE_PRIORITY_THRESHOLD: f32 = 0.65;
pub const DEFAULT_NLP_MODEL_CACHE_SIZE: usize = 3;
pub const DEFAULT_NLP_MODEL_TTL_SECONDS: u64 = 3600;

/// Wake-tick interval for the dispatcher.
pub const DEFAULT_WAKE_TICK_SECONDS: u64 = 5;

/// Retry policy.
pub const DEFAULT_RETRY_BASE_SECONDS: u64 = 1;
pub const DEFAULT_RETRY_CAP_SECONDS: u64 = 600;
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Stuck-jobs sweep interval.
pub const DEFAULT_STUCK_JOB_SWEEP_SECONDS: u64 = 300;

/// Top-K descriptions considered for image generation per chapter.
pub const DEFAULT_IMAGE_TOP_K: usize = 3;
