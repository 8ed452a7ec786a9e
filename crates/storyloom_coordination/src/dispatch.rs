//! Wake-tick dispatch loop.
//!
//! Doubling backoff with jitter when the queue is empty or every pop is
//! blocked by an admission gate. Pops are retried on a fixed wake tick too,
//! so a released slot or an expired cooldown is never missed for longer than
//! `wake_tick_seconds`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::admission::{AdmissionControl, ResourceSampler};
use crate::db::JobQueue;
use crate::server::CoordinationServer;
use crate::store::CoordinationStore;
use storyloom_protocol::{DispatchCommand, WireJobId};

/// Derives a wire-header job id from the durable UUID job id. Only needs to
/// be stable for the lifetime of one dispatch, not globally unique, so a
/// plain hash is enough for the wire header.
fn wire_job_id(job_id: &str) -> WireJobId {
    let mut hasher = DefaultHasher::new();
    job_id.hash(&mut hasher);
    WireJobId::new(hasher.finish())
}

const DISPATCH_BACKOFF_BASE_MS: u64 = 50;
const DISPATCH_BACKOFF_MAX_MS: u64 = 1_000;
const DISPATCH_BACKOFF_JITTER_MS: u64 = 50;

pub struct Dispatcher<S: CoordinationStore, R: ResourceSampler> {
    queue: JobQueue,
    admission: AdmissionControl<S, R>,
    wake_tick: Duration,
    queue_timeout: Duration,
    backoff_ms: u64,
    cooldown_until: Option<Instant>,
}

impl<S: CoordinationStore, R: ResourceSampler> Dispatcher<S, R> {
    pub fn new(
        queue: JobQueue,
        admission: AdmissionControl<S, R>,
        wake_tick: Duration,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            admission,
            wake_tick,
            queue_timeout,
            backoff_ms: 0,
            cooldown_until: None,
        }
    }

    /// Run forever, waking on `wake_tick` unless a dispatch backoff is
    /// currently in effect. Requires exclusive access to the control-plane
    /// listener so a claimed job can be hand off to an idle worker in the
    /// same tick; callers that also need to service `server.recv_one()`
    /// concurrently should drive `tick`/`wait_duration` from their own
    /// select loop instead (see `storyloom_coordination::main`).
    pub async fn run(&mut self, server: &mut CoordinationServer) {
        loop {
            let wait = self.wait_duration();
            tokio::time::sleep(wait).await;
            self.tick(server).await;
        }
    }

    /// How long to sleep before the next `tick`, honoring any backoff in
    /// effect from a previous empty or deferred pop.
    pub fn wait_duration(&self) -> Duration {
        self.next_wait()
    }

    fn next_wait(&self) -> Duration {
        match self.cooldown_until {
            Some(until) if until > Instant::now() => until - Instant::now(),
            _ => self.wake_tick,
        }
    }

    /// One dispatch attempt: pop the head of the queue, try to acquire a
    /// slot for it, hand it to an idle worker over the control plane, and
    /// park it back on any failure along the way.
    pub async fn tick(&mut self, server: &mut CoordinationServer) {
        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return;
            }
        }

        let job = match self.queue.pop_job().await {
            Ok(job) => job,
            Err(err) => {
                warn!(error = %err, "failed to pop job from queue");
                self.schedule_backoff();
                return;
            }
        };

        let Some(job) = job else {
            self.schedule_backoff();
            return;
        };

        let age = chrono::Utc::now() - job.queued_at;
        if age.num_seconds() as u64 > self.queue_timeout.as_secs() {
            warn!(job_id = %job.id, "job exceeded queue timeout, failing");
            let _ = self.queue.fail_job(&job.id, "queue_timeout").await;
            self.backoff_ms = 0;
            self.cooldown_until = None;
            return;
        }

        if !self.admission.acquire_slot(&job.book_id, &job.user_id).await {
            // Gate still fails; put it back as queued for the next tick.
            // `pop_job` already flipped it to `running`, so the gate's own
            // recheck counts it against itself — not a failed attempt at
            // running the job, so this must not bump `attempts`.
            let _ = self.queue.defer_job(&job.id, "deferred_by_admission").await;
            self.schedule_backoff();
            return;
        }

        let Some(identity) = server.idle_workers().into_iter().next() else {
            warn!(job_id = %job.id, "no idle worker connected, returning job to queue");
            self.admission
                .release_slot(&job.book_id, &job.user_id, &job.id)
                .await;
            let _ = self.queue.defer_job(&job.id, "no_idle_worker").await;
            self.schedule_backoff();
            return;
        };

        let command = DispatchCommand {
            job_id: job.id.clone(),
            book_id: job.book_id.clone(),
            user_id: job.user_id.clone(),
            priority: job.priority.clamp(0, u8::MAX as i64) as u8,
            attempt: job.attempts.max(0) as u32,
        };

        match server.dispatch_to(identity, wire_job_id(&job.id), &command).await {
            Ok(()) => {
                info!(job_id = %job.id, book_id = %job.book_id, "dispatched job to worker");
                self.backoff_ms = 0;
                self.cooldown_until = None;
            }
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to dispatch job to worker");
                self.admission
                    .release_slot(&job.book_id, &job.user_id, &job.id)
                    .await;
                let _ = self.queue.defer_job(&job.id, "dispatch_send_failed").await;
                self.schedule_backoff();
            }
        }
    }

    fn schedule_backoff(&mut self) {
        let next = if self.backoff_ms == 0 {
            DISPATCH_BACKOFF_BASE_MS
        } else {
            (self.backoff_ms * 2).min(DISPATCH_BACKOFF_MAX_MS)
        };
        self.backoff_ms = next;

        let jitter_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 % DISPATCH_BACKOFF_JITTER_MS)
            .unwrap_or(0);
        self.cooldown_until = Some(Instant::now() + Duration::from_millis(next + jitter_ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use crate::store::InMemoryStore;
    use storyloom_db::pool::{create_pool, DbConfig};

    struct FixedSampler;
    impl ResourceSampler for FixedSampler {
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

    async fn insert_job(pool: &sqlx::SqlitePool, id: &str, book_id: &str) {
        sqlx::query(
            "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at)
             VALUES (?, ?, 'user-1', 'queued', 5, 0, ?)",
        )
        .bind(id)
        .bind(book_id)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn test_server(pool: sqlx::SqlitePool) -> CoordinationServer {
        CoordinationServer::bind("tcp://127.0.0.1:0", JobQueue::new(pool))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn tick_requeues_job_when_no_worker_connected() {
        // No worker has sent `Identify` yet, so admission succeeds but
        // there is nobody to hand the job to; the job must go back to
        // `queued` rather than being silently dropped.
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        insert_job(&pool, "job-1", "book-1").await;

        let queue = JobQueue::new(pool.clone());
        let admission_queue = JobQueue::new(pool.clone());
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            FixedSampler,
            admission_queue,
            AdmissionConfig::default(),
        );

        let mut dispatcher = Dispatcher::new(
            queue,
            admission,
            Duration::from_secs(5),
            Duration::from_secs(3600),
        );
        let mut server = test_server(pool.clone()).await;
        dispatcher.tick(&mut server).await;
        assert!(dispatcher.backoff_ms > 0);

        let job: storyloom_db::models::ParsingJob =
            sqlx::query_as("SELECT * FROM parsing_jobs WHERE id = 'job-1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(matches!(job.state, storyloom_db::models::ParsingJobState::Queued));
        assert_eq!(job.attempts, 0, "a deferred job must not count as a failed attempt");
    }

    #[tokio::test]
    async fn tick_backs_off_on_empty_queue() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool.clone());
        let admission_queue = JobQueue::new(pool.clone());
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            FixedSampler,
            admission_queue,
            AdmissionConfig::default(),
        );

        let mut dispatcher = Dispatcher::new(
            queue,
            admission,
            Duration::from_secs(5),
            Duration::from_secs(3600),
        );
        let mut server = test_server(pool).await;
        dispatcher.tick(&mut server).await;
        assert!(dispatcher.backoff_ms > 0);
    }
}
