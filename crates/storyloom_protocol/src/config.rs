//! System configuration shared across the admission, worker and pipeline crates.
//!
//! Plain data, loaded once at binary startup and threaded through by value —
//! no process-wide mutable globals.

use std::time::Duration;

use crate::defaults::*;

/// Canonical orchestrator configuration. One field per configurable knob,
/// each with a stated default.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_global: u32,
    pub max_concurrent_per_user: u32,
    pub cooldown_seconds_per_book: u64,
    pub queue_timeout_seconds: u64,
    pub age_promotion_interval: u64,
    pub soft_time_limit_seconds: u64,
    pub hard_time_limit_seconds: u64,
    pub max_tasks_per_child: u32,
    pub max_memory_per_child_bytes: u64,
    pub max_memory_percent: f32,
    pub max_cpu_percent: f32,
    pub min_free_memory_mb: u64,
    pub processing_mode: String,
    pub max_parallel_processors: usize,
    pub consensus_threshold: f32,
    pub image_priority_threshold: f32,
    pub image_top_k: usize,
    pub nlp_model_cache_size: usize,
    pub nlp_model_ttl_seconds: u64,
    pub wake_tick_seconds: u64,
    pub skip_service_pages: bool,
    pub stuck_job_sweep_seconds: u64,
    pub database_url: String,
    pub coordination_url: Option<String>,
    pub bind_addr: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_global: DEFAULT_MAX_CONCURRENT_GLOBAL,
            max_concurrent_per_user: DEFAULT_MAX_CONCURRENT_PER_USER,
            cooldown_seconds_per_book: DEFAULT_COOLDOWN_SECONDS_PER_BOOK,
            queue_timeout_seconds: DEFAULT_QUEUE_TIMEOUT_SECONDS,
            age_promotion_interval: DEFAULT_AGE_PROMOTION_INTERVAL,
            soft_time_limit_seconds: DEFAULT_SOFT_TIME_LIMIT_SECONDS,
            hard_time_limit_seconds: DEFAULT_HARD_TIME_LIMIT_SECONDS,
            max_tasks_per_child: DEFAULT_MAX_TASKS_PER_CHILD,
            max_memory_per_child_bytes: DEFAULT_MAX_MEMORY_PER_CHILD_BYTES,
            max_memory_percent: DEFAULT_MAX_MEMORY_PERCENT,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            min_free_memory_mb: DEFAULT_MIN_FREE_MEMORY_MB,
            processing_mode: "adaptive".to_string(),
            max_parallel_processors: DEFAULT_MAX_PARALLEL_PROCESSORS,
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            image_priority_threshold: DEFAULT_IMAGE_PRIORITY_THRESHOLD,
            image_top_k: DEFAULT_IMAGE_TOP_K,
            nlp_model_cache_size: DEFAULT_NLP_MODEL_CACHE_SIZE,
            nlp_model_ttl_seconds: DEFAULT_NLP_MODEL_TTL_SECONDS,
            wake_tick_seconds: DEFAULT_WAKE_TICK_SECONDS,
            skip_service_pages: true,
            stuck_job_sweep_seconds: DEFAULT_STUCK_JOB_SWEEP_SECONDS,
            database_url: "sqlite://storyloom.db".to_string(),
            coordination_url: None,
            bind_addr: DEFAULT_SENTINEL_BIND_ADDR.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Layered load: built-in defaults, overridden by `STORYLOOM_*` env vars.
    /// An optional TOML file can further override these before the binary
    /// calls this.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        macro_rules! env_u32 {
            ($key:expr, $field:expr) => {
                if let Ok(v) = std::env::var($key) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }
        macro_rules! env_u64 {
            ($key:expr, $field:expr) => {
                if let Ok(v) = std::env::var($key) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }
        macro_rules! env_f32 {
            ($key:expr, $field:expr) => {
                if let Ok(v) = std::env::var($key) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        env_u32!("STORYLOOM_MAX_CONCURRENT_GLOBAL", cfg.max_concurrent_global);
        env_u32!(
            "STORYLOOM_MAX_CONCURRENT_PER_USER",
            cfg.max_concurrent_per_user
        );
        env_u64!(
            "STORYLOOM_COOLDOWN_SECONDS_PER_BOOK",
            cfg.cooldown_seconds_per_book
        );
        env_u64!("STORYLOOM_QUEUE_TIMEOUT_SECONDS", cfg.queue_timeout_seconds);
        env_u64!(
            "STORYLOOM_AGE_PROMOTION_INTERVAL",
            cfg.age_promotion_interval
        );
        env_u64!(
            "STORYLOOM_SOFT_TIME_LIMIT_SECONDS",
            cfg.soft_time_limit_seconds
        );
        env_u64!(
            "STORYLOOM_HARD_TIME_LIMIT_SECONDS",
            cfg.hard_time_limit_seconds
        );
        env_u32!("STORYLOOM_MAX_TASKS_PER_CHILD", cfg.max_tasks_per_child);
        env_f32!("STORYLOOM_MAX_MEMORY_PERCENT", cfg.max_memory_percent);
        env_f32!("STORYLOOM_MAX_CPU_PERCENT", cfg.max_cpu_percent);
        env_u64!("STORYLOOM_MIN_FREE_MEMORY_MB", cfg.min_free_memory_mb);
        env_f32!("STORYLOOM_CONSENSUS_THRESHOLD", cfg.consensus_threshold);
        env_f32!(
            "STORYLOOM_IMAGE_PRIORITY_THRESHOLD",
            cfg.image_priority_threshold
        );

        if let Ok(v) = std::env::var("STORYLOOM_PROCESSING_MODE") {
            cfg.processing_mode = v;
        }
        if let Ok(v) = std::env::var("STORYLOOM_DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Ok(v) = std::env::var("STORYLOOM_COORDINATION_URL") {
            cfg.coordination_url = Some(v);
        }
        if let Ok(v) = std::env::var("STORYLOOM_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = std::env::var("STORYLOOM_SKIP_SERVICE_PAGES") {
            cfg.skip_service_pages = v != "0" && v.to_lowercase() != "false";
        }

        cfg
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_seconds)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_seconds)
    }
}
