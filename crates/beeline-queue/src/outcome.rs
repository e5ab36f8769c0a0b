//! Applies worker-reported outcomes to the job store.

use crate::metrics::QueueMetrics;
use crate::retry::RetryPolicy;
use beeline_core::{
    FailDisposition, Job, JobId, JobStore, LeaseToken, QueueError, QueueResult, TransitionOutcome,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handles `complete` and `fail` reports idempotently.
///
/// Both reports are token-guarded store transitions. A stale report
/// (the lease was already resolved or reclaimed) is swallowed as a
/// no-op so worker replays are safe; a token that loses to a live
/// foreign lease is a conflict the caller must stop on.
pub struct OutcomeHandler {
    store: Arc<dyn JobStore>,
    retry: RetryPolicy,
}

impl OutcomeHandler {
    /// Creates a handler over the given store and retry policy.
    pub fn new(store: Arc<dyn JobStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Marks a leased job completed.
    pub async fn complete(&self, id: JobId, token: LeaseToken) -> QueueResult<()> {
        self.complete_at(Utc::now(), id, token).await
    }

    /// [`complete`](Self::complete) with an explicit `now`.
    pub async fn complete_at(
        &self,
        now: DateTime<Utc>,
        id: JobId,
        token: LeaseToken,
    ) -> QueueResult<()> {
        match self.store.complete(id, token, now).await? {
            TransitionOutcome::Applied => {
                info!(job_id = %id, "job completed");
                QueueMetrics::job_completed();
                Ok(())
            }
            TransitionOutcome::Stale => {
                // Late or duplicate report; the record has moved on.
                debug!(job_id = %id, "stale completion ignored");
                Ok(())
            }
            TransitionOutcome::Conflict => {
                QueueMetrics::lease_conflict();
                Err(QueueError::conflict(format!(
                    "job {} is leased by another worker",
                    id
                )))
            }
        }
    }

    /// Records a failure report, retrying or dead-lettering per policy.
    pub async fn fail(
        &self,
        id: JobId,
        token: LeaseToken,
        error: &str,
        retryable: bool,
    ) -> QueueResult<()> {
        self.fail_at(Utc::now(), id, token, error, retryable).await
    }

    /// [`fail`](Self::fail) with an explicit `now`.
    pub async fn fail_at(
        &self,
        now: DateTime<Utc>,
        id: JobId,
        token: LeaseToken,
        error: &str,
        retryable: bool,
    ) -> QueueResult<()> {
        let Some(job) = self.store.get(id).await? else {
            return Err(QueueError::not_found(id));
        };
        // attempt only changes on claims and the token guard pins the
        // claim, so the disposition computed here cannot go stale.
        let disposition = self.disposition_for(&job, retryable, now);

        match self.store.fail(id, token, disposition, error, now).await? {
            TransitionOutcome::Applied => {
                match disposition {
                    FailDisposition::Retry { next_run_at } => {
                        info!(
                            job_id = %id,
                            attempt = job.attempt,
                            next_run_at = %next_run_at,
                            error = %error,
                            "job failed, scheduled for retry"
                        );
                        QueueMetrics::job_retried(&job.job_type);
                    }
                    FailDisposition::Dead => {
                        warn!(
                            job_id = %id,
                            attempt = job.attempt,
                            error = %error,
                            "job dead-lettered"
                        );
                        QueueMetrics::job_dead_lettered(&job.job_type);
                    }
                }
                Ok(())
            }
            TransitionOutcome::Stale => {
                debug!(job_id = %id, "stale failure report ignored");
                Ok(())
            }
            TransitionOutcome::Conflict => {
                QueueMetrics::lease_conflict();
                Err(QueueError::conflict(format!(
                    "job {} is leased by another worker",
                    id
                )))
            }
        }
    }

    /// Decides retry versus dead-letter for a failed attempt.
    pub fn disposition_for(
        &self,
        job: &Job,
        retryable: bool,
        now: DateTime<Utc>,
    ) -> FailDisposition {
        if !retryable || self.retry.should_deadletter(job.attempt, job.max_attempts) {
            FailDisposition::Dead
        } else {
            FailDisposition::Retry {
                next_run_at: self.retry.next_run_at(job.attempt, now),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::memory::MemoryJobStore;
    use beeline_core::{JobStatus, LeaseClaim, NewJob};
    use chrono::Duration;

    fn handler(store: Arc<MemoryJobStore>) -> OutcomeHandler {
        let retry = RetryPolicy::new(&RetryConfig::default()).without_jitter();
        OutcomeHandler::new(store, retry)
    }

    async fn leased_job(store: &MemoryJobStore, now: DateTime<Utc>, max_attempts: u32) -> (Job, LeaseToken) {
        let job = Job::create(NewJob::new("email.send"), now, max_attempts);
        store.insert(job.clone()).await.unwrap();
        let token = LeaseToken::new();
        let claimed = store
            .try_claim(
                job.id,
                LeaseClaim {
                    token,
                    worker_id: "w-1".to_string(),
                    expires_at: now + Duration::seconds(30),
                },
                now,
            )
            .await
            .unwrap()
            .unwrap();
        (claimed, token)
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, token) = leased_job(&store, now, 3).await;
        let handler = handler(store.clone());

        handler.complete_at(now, job.id, token).await.unwrap();
        // Replays with the same token are no-ops.
        handler.complete_at(now, job.id, token).await.unwrap();
        handler
            .fail_at(now, job.id, token, "late failure", true)
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_fail_retryable_applies_backoff() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, token) = leased_job(&store, now, 3).await;
        let handler = handler(store.clone());

        let fail_time = now + Duration::seconds(1);
        handler
            .fail_at(fail_time, job.id, token, "smtp timeout", true)
            .await
            .unwrap();

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempt, 1);
        // First retry waits the base delay of one second.
        assert_eq!(stored.run_at, fail_time + Duration::seconds(1));
        assert_eq!(stored.last_error.as_deref(), Some("smtp timeout"));
        assert!(stored.lease_token.is_none());
        assert!(stored.lease_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_fail_non_retryable_dead_letters() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, token) = leased_job(&store, now, 3).await;

        handler(store.clone())
            .fail_at(now, job.id, token, "bad payload", false)
            .await
            .unwrap();
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
    }

    #[tokio::test]
    async fn test_fail_exhausted_attempts_dead_letters() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, token) = leased_job(&store, now, 1).await;

        handler(store.clone())
            .fail_at(now, job.id, token, "still broken", true)
            .await
            .unwrap();
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
    }

    #[tokio::test]
    async fn test_foreign_token_conflicts() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, _token) = leased_job(&store, now, 3).await;
        let handler = handler(store.clone());

        let err = handler
            .complete_at(now, job.id, LeaseToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");

        let err = handler
            .fail_at(now, job.id, LeaseToken::new(), "boom", true)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CONFLICT");

        // The live lease is untouched.
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Leased);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = Arc::new(MemoryJobStore::new());
        let handler = handler(store);
        let err = handler
            .complete(JobId::new(), LeaseToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NOT_FOUND");
    }
}
