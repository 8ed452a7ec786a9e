//! Admission & Rate Control.
//!
//! Given `(book_id, user_id)`, decide admit/defer/reject by evaluating five
//! gates in order; the first failing gate determines the outcome. Gates 1-4
//! consult the shared [`CoordinationStore`] so the decision is correct
//! across every admission instance in the fleet, not just this process.

use std::time::Duration;

use storyloom_protocol::{AdmissionDecision, AdmissionReason};
use sysinfo::System;

use crate::db::JobQueue;
use crate::store::CoordinationStore;

pub struct AdmissionConfig {
    pub max_concurrent_global: u32,
    pub max_concurrent_per_user: u32,
    pub cooldown: Duration,
    pub max_memory_percent: f32,
    pub max_cpu_percent: f32,
    pub min_free_memory_mb: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        use storyloom_protocol::defaults::*;
        Self {
            max_concurrent_global: DEFAULT_MAX_CONCURRENT_GLOBAL,
            max_concurrent_per_user: DEFAULT_MAX_CONCURRENT_PER_USER,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECONDS_PER_BOOK),
            max_memory_percent: DEFAULT_MAX_MEMORY_PERCENT,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            min_free_memory_mb: DEFAULT_MIN_FREE_MEMORY_MB,
        }
    }
}

/// System resource sampler, abstracted so tests can inject fixed readings
/// instead of querying the real host via `sysinfo`.
pub trait ResourceSampler: Send + Sync {
    fn memory_percent(&self) -> f32;
    fn free_memory_mb(&self) -> u64;
    fn cpu_percent(&self) -> f32;
}

pub struct SysinfoSampler {
    system: std::sync::Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: std::sync::Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn memory_percent(&self) -> f32 {
        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        (system.used_memory() as f64 / total as f64 * 100.0) as f32
    }

    fn free_memory_mb(&self) -> u64 {
        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        system.refresh_memory();
        system.available_memory() / (1024 * 1024)
    }

    fn cpu_percent(&self) -> f32 {
        let mut system = self.system.lock().expect("sysinfo lock poisoned");
        system.refresh_cpu_usage();
        let cpus = system.cpus();
        if cpus.is_empty() {
            return 0.0;
        }
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    }
}

pub struct AdmissionControl<S: CoordinationStore, R: ResourceSampler> {
    store: S,
    resources: R,
    queue: JobQueue,
    config: AdmissionConfig,
}

const ACTIVE_BOOKS_SET: &str = "active_books";

fn cooldown_key(book_id: &str) -> String {
    format!("cooldown:{book_id}")
}

impl<S: CoordinationStore, R: ResourceSampler> AdmissionControl<S, R> {
    pub fn new(store: S, resources: R, queue: JobQueue, config: AdmissionConfig) -> Self {
        Self {
            store,
            resources,
            queue,
            config,
        }
    }

    /// Evaluate the five gates without mutating any state.
    pub async fn can_start(
        &self,
        book_id: &str,
        user_id: &str,
    ) -> (AdmissionDecision, AdmissionReason) {
        match self.evaluate_gates(book_id, user_id).await {
            Ok(()) => (AdmissionDecision::Admit, AdmissionReason::Admitted),
            Err(reason) => {
                let decision = match reason {
                    AdmissionReason::HardPolicy => AdmissionDecision::Reject,
                    AdmissionReason::CoordinationUnavailable => AdmissionDecision::Reject,
                    _ => AdmissionDecision::Defer,
                };
                (decision, reason)
            }
        }
    }

    /// Atomically acquire a slot: re-check every gate, and if all pass,
    /// install the cooldown mark and record the book as active in the same
    /// pass so a concurrent caller cannot slip through between the check
    /// and the install.
    pub async fn acquire_slot(&self, book_id: &str, user_id: &str) -> bool {
        if self.evaluate_gates(book_id, user_id).await.is_err() {
            return false;
        }

        // Cooldown mark must land before we report success, otherwise a
        // racing caller could observe gate 1 as still-open.
        let cooldown_installed = match self
            .store
            .set_nx_ttl(&cooldown_key(book_id), user_id, self.config.cooldown)
            .await
        {
            Ok(installed) => installed,
            Err(_) => return false,
        };
        if !cooldown_installed {
            return false;
        }

        match self.store.sadd(ACTIVE_BOOKS_SET, book_id).await {
            Ok(_) => true,
            Err(_) => {
                let _ = self.store.srem(ACTIVE_BOOKS_SET, book_id).await;
                false
            }
        }
    }

    /// Idempotent: releasing a slot that is not held is a no-op.
    pub async fn release_slot(&self, book_id: &str, _user_id: &str, _job_id: &str) {
        let _ = self.store.srem(ACTIVE_BOOKS_SET, book_id).await;
    }

    async fn evaluate_gates(&self, book_id: &str, user_id: &str) -> Result<(), AdmissionReason> {
        // Gate 1: per-book cooldown.
        let cooling_down = self
            .store
            .exists(&cooldown_key(book_id))
            .await
            .map_err(|_| AdmissionReason::CoordinationUnavailable)?;
        if cooling_down {
            return Err(AdmissionReason::BookCooldown);
        }

        // Gate 2: global concurrency, counted from durable job state so it
        // survives an admission-control restart.
        let global_running = self
            .queue
            .running_count_global()
            .await
            .map_err(|_| AdmissionReason::CoordinationUnavailable)?;
        if global_running >= self.config.max_concurrent_global as i64 {
            return Err(AdmissionReason::GlobalCapacity);
        }

        // Gate 3: per-user concurrency.
        let user_running = self
            .queue
            .running_count_for_user(user_id)
            .await
            .map_err(|_| AdmissionReason::CoordinationUnavailable)?;
        if user_running >= self.config.max_concurrent_per_user as i64 {
            return Err(AdmissionReason::UserQuota);
        }

        // Gate 4: system resources.
        if self.resources.memory_percent() > self.config.max_memory_percent
            || self.resources.free_memory_mb() < self.config.min_free_memory_mb
            || self.resources.cpu_percent() > self.config.max_cpu_percent
        {
            return Err(AdmissionReason::SystemResources);
        }

        // Gate 5 (hard policy) is evaluated by the caller before admission
        // is attempted at all — it depends on subscription/book-size data
        // outside this crate's remit.

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use storyloom_db::pool::{create_pool, DbConfig};

    struct FixedSampler {
        memory_percent: f32,
        free_memory_mb: u64,
        cpu_percent: f32,
    }

    impl ResourceSampler for FixedSampler {
        fn memory_percent(&self) -> f32 {
            self.memory_percent
        }
        fn free_memory_mb(&self) -> u64 {
            self.free_memory_mb
        }
        fn cpu_percent(&self) -> f32 {
            self.cpu_percent
        }
    }

    fn healthy_sampler() -> FixedSampler {
        FixedSampler {
            memory_percent: 40.0,
            free_memory_mb: 4096,
            cpu_percent: 20.0,
        }
    }

    #[tokio::test]
    async fn admits_when_all_gates_pass() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool);
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            healthy_sampler(),
            queue,
            AdmissionConfig::default(),
        );

        let (decision, reason) = admission.can_start("book-1", "user-1").await;
        assert_eq!(decision, AdmissionDecision::Admit);
        assert_eq!(reason, AdmissionReason::Admitted);
    }

    #[tokio::test]
    async fn defers_on_cooldown() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool);
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            healthy_sampler(),
            queue,
            AdmissionConfig::default(),
        );

        assert!(admission.acquire_slot("book-1", "user-1").await);
        let (decision, reason) = admission.can_start("book-1", "user-2").await;
        assert_eq!(decision, AdmissionDecision::Defer);
        assert_eq!(reason, AdmissionReason::BookCooldown);
    }

    #[tokio::test]
    async fn defers_on_low_memory() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool);
        let sampler = FixedSampler {
            memory_percent: 95.0,
            free_memory_mb: 100,
            cpu_percent: 10.0,
        };
        let admission =
            AdmissionControl::new(InMemoryStore::new(), sampler, queue, AdmissionConfig::default());

        let (decision, reason) = admission.can_start("book-1", "user-1").await;
        assert_eq!(decision, AdmissionDecision::Defer);
        assert_eq!(reason, AdmissionReason::SystemResources);
    }

    #[tokio::test]
    async fn release_slot_is_idempotent() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool);
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            healthy_sampler(),
            queue,
            AdmissionConfig::default(),
        );

        admission.release_slot("book-1", "user-1", "job-1").await;
        admission.release_slot("book-1", "user-1", "job-1").await;
    }

    /// 6 books from 6 different users with `max_concurrent_global = 5`
    /// yields 5 admits and 1 defer.
    #[tokio::test]
    async fn defers_on_global_capacity_breach() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            healthy_sampler(),
            JobQueue::new(pool.clone()),
            AdmissionConfig::default(),
        );

        for i in 0..5 {
            let book = format!("book-{i}");
            let user = format!("user-{i}");
            assert!(admission.acquire_slot(&book, &user).await);
            insert_running_job(&pool, &format!("job-{i}"), &book, &user).await;
        }

        let (decision, reason) = admission.can_start("book-5", "user-5").await;
        assert_eq!(decision, AdmissionDecision::Defer);
        assert_eq!(reason, AdmissionReason::GlobalCapacity);
    }

    /// A second submission from the same user with
    /// `max_concurrent_per_user = 1` defers with reason `user_quota`.
    #[tokio::test]
    async fn defers_on_per_user_quota() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            healthy_sampler(),
            JobQueue::new(pool.clone()),
            AdmissionConfig::default(),
        );

        assert!(admission.acquire_slot("book-1", "user-1").await);
        insert_running_job(&pool, "job-1", "book-1", "user-1").await;

        let (decision, reason) = admission.can_start("book-2", "user-1").await;
        assert_eq!(decision, AdmissionDecision::Defer);
        assert_eq!(reason, AdmissionReason::UserQuota);
    }

    /// Inserts a row directly in `running` state, standing in for a job
    /// that has already been claimed off the queue by a worker — gates 2
    /// and 3 count off this table, not the coordination store.
    async fn insert_running_job(pool: &sqlx::SqlitePool, id: &str, book_id: &str, user_id: &str) {
        sqlx::query(
            "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at, started_at)
             VALUES (?, ?, ?, 'running', 5, 0, ?, ?)",
        )
        .bind(id)
        .bind(book_id)
        .bind(user_id)
        .bind(chrono::Utc::now())
        .bind(chrono::Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }
}

/// Property: `|active_jobs| <= max_concurrent_global` always. Replays a
/// random sequence of admit-attempts and releases against a fixed cap and
/// checks the invariant holds after every step, not just in the hand-picked
/// scenarios above.
#[cfg(test)]
mod capacity_properties {
    use super::*;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;
    use storyloom_db::pool::{create_pool, DbConfig};

    const MAX_GLOBAL: u32 = 3;

    struct HealthySampler;
    impl ResourceSampler for HealthySampler {
        fn memory_percent(&self) -> f32 {
            10.0
        }
        fn free_memory_mb(&self) -> u64 {
            8192
        }
        fn cpu_percent(&self) -> f32 {
            5.0
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Attempt(u8),
        Release,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..8).prop_map(Op::Attempt),
            Just(Op::Release),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn global_running_count_never_exceeds_cap(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async {
                let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
                let admission = AdmissionControl::new(
                    InMemoryStore::new(),
                    HealthySampler,
                    JobQueue::new(pool.clone()),
                    AdmissionConfig {
                        max_concurrent_global: MAX_GLOBAL,
                        ..AdmissionConfig::default()
                    },
                );

                let mut running: Vec<String> = Vec::new();
                let mut next_id = 0u32;

                for op in ops {
                    match op {
                        Op::Attempt(user) => {
                            let book = format!("book-{next_id}");
                            let user = format!("user-{user}");
                            next_id += 1;
                            let (decision, _) = admission.can_start(&book, &user).await;
                            if decision == AdmissionDecision::Admit {
                                let job_id = format!("job-{next_id}");
                                sqlx::query(
                                    "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at, started_at)
                                     VALUES (?, ?, ?, 'running', 5, 0, ?, ?)",
                                )
                                .bind(&job_id)
                                .bind(&book)
                                .bind(&user)
                                .bind(chrono::Utc::now())
                                .bind(chrono::Utc::now())
                                .execute(&pool)
                                .await
                                .unwrap();
                                running.push(job_id);
                            }
                        }
                        Op::Release => {
                            if let Some(job_id) = running.pop() {
                                sqlx::query("UPDATE parsing_jobs SET state = 'succeeded' WHERE id = ?")
                                    .bind(&job_id)
                                    .execute(&pool)
                                    .await
                                    .unwrap();
                            }
                        }
                    }

                    let count = admission.queue.running_count_global().await.unwrap();
                    prop_assert!(count <= MAX_GLOBAL as i64);
                }
                Ok(())
            })?;
        }
    }
}
