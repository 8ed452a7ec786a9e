//! `ParsingJob` queue: atomic claim via `UPDATE ... WHERE state = 'queued'`,
//! ordered by priority ascending (1 = high .. 10 = low) then arrival time.

use chrono::Utc;
use sqlx::SqlitePool;
use storyloom_db::{DbError, ParsingJob};
use tracing::info;

pub struct JobQueue {
    pool: SqlitePool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl JobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ingress write: place a new job on the queue in `queued` state, taken
    /// when `submit_book`'s admission check defers rather than admits.
    /// `priority` follows the convention of 1 = highest, 10 = lowest.
    pub async fn enqueue_job(
        &self,
        job_id: &str,
        book_id: &str,
        user_id: &str,
        priority: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at)
            VALUES (?, ?, ?, 'queued', ?, 0, ?)
            "#,
        )
        .bind(job_id)
        .bind(book_id)
        .bind(user_id)
        .bind(priority)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        info!(job_id, book_id, "enqueued parsing job");
        Ok(())
    }

    /// Atomically claim the highest-priority queued job whose `queued_at`
    /// has already arrived — a job requeued with a retry backoff
    /// (`requeue_job_after_failure`) stamps `queued_at` into the future, so
    /// this filter is what actually makes the backoff delay hold.
    ///
    /// Two-step claim under one transaction: find the candidate row, then
    /// `UPDATE ... WHERE state = 'queued'` to flip it to `running`. If the
    /// row count affected is zero, another worker won the race and we
    /// return `Ok(None)` rather than retrying — the next wake tick picks up
    /// the next candidate.
    pub async fn pop_job(&self) -> Result<Option<ParsingJob>, DbError> {
        let mut tx = self.pool.begin().await?;

        let job_id: Option<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM parsing_jobs
            WHERE state = 'queued' AND queued_at <= ?
            ORDER BY priority ASC, queued_at ASC
            LIMIT 1
            "#,
        )
        .bind(Utc::now())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job_id) = job_id else {
            tx.commit().await?;
            return Ok(None);
        };

        let now = Utc::now();
        let rows_affected = sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'running', started_at = ?
            WHERE id = ? AND state = 'queued'
            "#,
        )
        .bind(now)
        .bind(&job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let job: ParsingJob = sqlx::query_as("SELECT * FROM parsing_jobs WHERE id = ?")
            .bind(&job_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(job_id = %job.id, book_id = %job.book_id, "claimed parsing job");

        Ok(Some(job))
    }

    /// Mark a job `succeeded`.
    pub async fn complete_job(&self, job_id: &str) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'succeeded', finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, "parsing job succeeded");
        Ok(())
    }

    /// Mark a job `failed` with a terminal error (retries exhausted).
    pub async fn fail_job(&self, job_id: &str, error: &str) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'failed', finished_at = ?, last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, error, "parsing job failed");
        Ok(())
    }

    /// Mark a job `cancelled`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), DbError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'cancelled', finished_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, "parsing job cancelled");
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<ParsingJob>, DbError> {
        let job = sqlx::query_as("SELECT * FROM parsing_jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Requeue a job after a transient worker-reported failure
    /// (`OpCode::Conclude` with `is_transient`), honoring the retry
    /// backoff by pushing `queued_at` out rather than
    /// leaving the job immediately re-poppable.
    pub async fn requeue_job_after_failure(
        &self,
        job_id: &str,
        error: &str,
        not_before: chrono::DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'queued',
                started_at = NULL,
                attempts = attempts + 1,
                queued_at = ?,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(not_before)
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, not_before = %not_before, "parsing job requeued after transient failure");
        Ok(())
    }

    /// Requeue a job after a transient failure (move `running` back to
    /// `queued`, bump `attempts`, record the error for diagnostics).
    pub async fn requeue_job(&self, job_id: &str, error: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'queued',
                started_at = NULL,
                attempts = attempts + 1,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(error)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, "parsing job requeued");
        Ok(())
    }

    /// Return a popped job to `queued` without touching `attempts`: used
    /// when a job is deferred before ever reaching a worker (admission gate
    /// still full, no idle worker connected, or the dispatch send itself
    /// failed). These aren't failed attempts at running the job, just a
    /// claim that didn't stick, so they must not count against
    /// `retry::should_retry`'s attempt budget.
    pub async fn defer_job(&self, job_id: &str, reason: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            UPDATE parsing_jobs
            SET state = 'queued',
                started_at = NULL,
                last_error = ?
            WHERE id = ?
            "#,
        )
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        info!(job_id, reason, "parsing job deferred back to queue");
        Ok(())
    }

    /// 1-based queue position of a still-`queued` job: 1 when nothing else
    /// queued sorts ahead of it, N when N-1 jobs do. `None` if the job
    /// doesn't exist or has already left the `queued` state.
    pub async fn position_of(&self, job_id: &str) -> Result<Option<i64>, DbError> {
        let job = match self.get_job(job_id).await? {
            Some(job) => job,
            None => return Ok(None),
        };
        if !matches!(job.state, storyloom_db::models::ParsingJobState::Queued) {
            return Ok(None);
        }

        let ahead: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM parsing_jobs
            WHERE state = 'queued'
              AND (priority < ? OR (priority = ? AND queued_at < ?))
            "#,
        )
        .bind(job.priority)
        .bind(job.priority)
        .bind(job.queued_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(ahead + 1))
    }

    /// Jobs stuck `running` past the hard time limit with no heartbeat —
    /// the periodic stuck-jobs sweep requeues
    /// these rather than leaving them orphaned forever.
    pub async fn find_stuck_jobs(&self, older_than_seconds: i64) -> Result<Vec<ParsingJob>, DbError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(older_than_seconds);
        let jobs: Vec<ParsingJob> = sqlx::query_as(
            r#"
            SELECT * FROM parsing_jobs
            WHERE state = 'running' AND started_at < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    pub async fn stats(&self) -> Result<QueueStats, DbError> {
        let stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE state = 'queued') as queued,
                COUNT(*) FILTER (WHERE state = 'running') as running,
                COUNT(*) FILTER (WHERE state = 'succeeded') as succeeded,
                COUNT(*) FILTER (WHERE state = 'failed') as failed,
                COUNT(*) FILTER (WHERE state = 'cancelled') as cancelled
            FROM parsing_jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }

    /// Count of jobs with `state = 'running'` for a given user (admission
    /// control's per-user concurrency gate).
    pub async fn running_count_for_user(&self, user_id: &str) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM parsing_jobs WHERE user_id = ? AND state = 'running'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Global count of `state = 'running'` jobs (admission control gate 2).
    pub async fn running_count_global(&self) -> Result<i64, DbError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM parsing_jobs WHERE state = 'running'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_db::pool::{create_pool, DbConfig};

    async fn setup() -> SqlitePool {
        create_pool(DbConfig::sqlite_memory()).await.unwrap()
    }

    async fn insert_job(pool: &SqlitePool, id: &str, book_id: &str, priority: i64) {
        sqlx::query(
            "INSERT INTO parsing_jobs (id, book_id, user_id, state, priority, attempts, queued_at)
             VALUES (?, ?, 'user-1', 'queued', ?, 0, ?)",
        )
        .bind(id)
        .bind(book_id)
        .bind(priority)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn pop_job_empty_queue_returns_none() {
        let pool = setup().await;
        let queue = JobQueue::new(pool);
        assert!(queue.pop_job().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_job_returns_highest_priority_first() {
        let pool = setup().await;
        insert_job(&pool, "job-low", "book-1", 8).await;
        insert_job(&pool, "job-high", "book-2", 1).await;

        let queue = JobQueue::new(pool);
        let job = queue.pop_job().await.unwrap().unwrap();
        assert_eq!(job.id, "job-high");
    }

    #[tokio::test]
    async fn complete_job_sets_succeeded_state() {
        let pool = setup().await;
        insert_job(&pool, "job-1", "book-1", 5).await;
        let queue = JobQueue::new(pool.clone());

        queue.pop_job().await.unwrap();
        queue.complete_job("job-1").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn requeue_bumps_attempts_and_returns_to_queued() {
        let pool = setup().await;
        insert_job(&pool, "job-1", "book-1", 5).await;
        let queue = JobQueue::new(pool.clone());

        queue.pop_job().await.unwrap();
        queue.requeue_job("job-1", "transient io error").await.unwrap();

        let job: ParsingJob = sqlx::query_as("SELECT * FROM parsing_jobs WHERE id = 'job-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job.attempts, 1);
        assert!(matches!(job.state, storyloom_db::models::ParsingJobState::Queued));
    }

    #[tokio::test]
    async fn defer_job_does_not_bump_attempts() {
        let pool = setup().await;
        insert_job(&pool, "job-1", "book-1", 5).await;
        let queue = JobQueue::new(pool.clone());

        queue.pop_job().await.unwrap();
        queue.defer_job("job-1", "deferred_by_admission").await.unwrap();

        let job: ParsingJob = sqlx::query_as("SELECT * FROM parsing_jobs WHERE id = 'job-1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(job.attempts, 0);
        assert!(matches!(job.state, storyloom_db::models::ParsingJobState::Queued));
    }

    #[tokio::test]
    async fn position_of_is_one_when_alone_in_queue() {
        let pool = setup().await;
        insert_job(&pool, "job-1", "book-1", 5).await;
        let queue = JobQueue::new(pool.clone());

        assert_eq!(queue.position_of("job-1").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn position_of_counts_higher_priority_jobs_ahead() {
        let pool = setup().await;
        insert_job(&pool, "job-high", "book-1", 1).await;
        insert_job(&pool, "job-mid", "book-2", 5).await;
        insert_job(&pool, "job-low", "book-3", 8).await;
        let queue = JobQueue::new(pool.clone());

        assert_eq!(queue.position_of("job-high").await.unwrap(), Some(1));
        assert_eq!(queue.position_of("job-mid").await.unwrap(), Some(2));
        assert_eq!(queue.position_of("job-low").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn position_of_returns_none_once_running() {
        let pool = setup().await;
        insert_job(&pool, "job-1", "book-1", 5).await;
        let queue = JobQueue::new(pool.clone());

        queue.pop_job().await.unwrap();
        assert_eq!(queue.position_of("job-1").await.unwrap(), None);
    }
}
