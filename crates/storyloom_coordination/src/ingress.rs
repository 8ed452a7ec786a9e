//! Ingress entry point (`submit_book`): check the gates, then either queue
//! the job or report why it was turned away.
//!
//! The HTTP layer (or, here, the `storyloom enqueue` CLI) has already
//! authenticated the caller and persisted the book's chapters via
//! `storyloom_db::repo::insert_book_with_chapters`; this call only decides
//! admission and, on anything but a hard reject, places the job on the
//! queue.

use storyloom_db::DbError;
use storyloom_protocol::{AdmissionDecision, AdmissionReason};

use crate::admission::{AdmissionControl, ResourceSampler};
use crate::db::JobQueue;
use crate::store::CoordinationStore;

/// Outcome of a `submit_book` call: an `{accepted, job_id, position?}`
/// triple. `position` is the 1-based rank of the job in the `queued`
/// state at the moment of submission (1 when nothing else queued sorts
/// ahead of it); it's `None` when the submission was rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub job_id: Option<String>,
    pub position: Option<i64>,
    pub reason: AdmissionReason,
}

/// Default priority for a submission that doesn't specify one. 1 = highest,
/// 10 = lowest; unspecified jobs sit in the middle of the range rather than
/// contending with explicitly-prioritized ones.
pub const DEFAULT_PRIORITY: i64 = 5;

/// Evaluate admission for `(book_id, user_id)` and, unless rejected
/// outright, place the job on the queue. A `Defer` still enqueues: the
/// dispatcher's wake tick will retry the gates itself once a slot frees up.
pub async fn submit_book<S: CoordinationStore, R: ResourceSampler>(
    admission: &AdmissionControl<S, R>,
    queue: &JobQueue,
    job_id: &str,
    book_id: &str,
    user_id: &str,
    priority: i64,
) -> Result<SubmitOutcome, DbError> {
    let (decision, reason) = admission.can_start(book_id, user_id).await;
    if decision == AdmissionDecision::Reject {
        return Ok(SubmitOutcome {
            accepted: false,
            job_id: None,
            position: None,
            reason,
        });
    }

    queue.enqueue_job(job_id, book_id, user_id, priority).await?;
    let position = queue.position_of(job_id).await?;
    Ok(SubmitOutcome {
        accepted: true,
        job_id: Some(job_id.to_string()),
        position,
        reason: AdmissionReason::Admitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionConfig, ResourceSampler};
    use crate::store::InMemoryStore;
    use storyloom_db::pool::{create_pool, DbConfig};

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

    #[tokio::test]
    async fn admitted_submission_lands_on_the_queue() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool.clone());
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            HealthySampler,
            JobQueue::new(pool.clone()),
            AdmissionConfig::default(),
        );

        let outcome = submit_book(&admission, &queue, "job-1", "book-1", "user-1", DEFAULT_PRIORITY)
            .await
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.job_id.as_deref(), Some("job-1"));
        assert_eq!(outcome.position, Some(1));

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn later_submission_reports_position_behind_earlier_ones() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool.clone());
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            HealthySampler,
            JobQueue::new(pool.clone()),
            AdmissionConfig::default(),
        );

        let first = submit_book(&admission, &queue, "job-1", "book-1", "user-1", DEFAULT_PRIORITY)
            .await
            .unwrap();
        assert_eq!(first.position, Some(1));

        let second = submit_book(&admission, &queue, "job-2", "book-2", "user-2", DEFAULT_PRIORITY)
            .await
            .unwrap();
        assert_eq!(second.position, Some(2));
    }

    #[tokio::test]
    async fn cooldown_still_enqueues_as_a_deferred_job() {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        let queue = JobQueue::new(pool.clone());
        let admission = AdmissionControl::new(
            InMemoryStore::new(),
            HealthySampler,
            JobQueue::new(pool.clone()),
            AdmissionConfig::default(),
        );
        assert!(admission.acquire_slot("book-1", "user-1").await);

        let outcome = submit_book(&admission, &queue, "job-2", "book-1", "user-2", DEFAULT_PRIORITY)
            .await
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.reason, AdmissionReason::BookCooldown);
    }
}
