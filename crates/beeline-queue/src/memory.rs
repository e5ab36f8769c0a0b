//! In-memory job store.
//!
//! Default backend for tests and local development. A single mutex
//! guards the records plus two ordered indexes, which makes every
//! conditional transition trivially atomic; the claimable and expiry
//! scans are bounded range walks over those indexes.

use beeline_core::{
    FailDisposition, Job, JobId, JobStatus, JobStore, LeaseClaim, LeaseToken, QueueError,
    QueueResult, StatusCounts, TransitionOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<JobId, Job>,
    /// Pending jobs keyed by `(run_at, id)`, the claim selection order.
    pending: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Leased jobs keyed by `(lease_expires_at, id)` for the sweeper.
    leased: BTreeSet<(DateTime<Utc>, JobId)>,
    /// Insertion order; listings walk it newest first.
    order: Vec<JobId>,
}

/// In-process [`JobStore`] implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// How a fail-shaped transition treats the expiry guard.
enum ExpiryGuard {
    Ignore,
    RequireExpiredBefore(DateTime<Utc>),
}

impl MemoryInner {
    fn drop_lease_index(&mut self, job: &Job) {
        if let Some(expires) = job.lease_expires_at {
            self.leased.remove(&(expires, job.id));
        }
    }

    /// Shared body of `fail` and `reclaim`; both are token-guarded, the
    /// reclaim additionally re-checks expiry at write time.
    fn fail_guarded(
        &mut self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
        expiry: &ExpiryGuard,
    ) -> QueueResult<TransitionOutcome> {
        let Some(job) = self.jobs.get(&id) else {
            return Err(QueueError::not_found(id));
        };
        if job.status != JobStatus::Leased {
            return Ok(TransitionOutcome::Stale);
        }
        if job.lease_token != Some(token) {
            return Ok(TransitionOutcome::Conflict);
        }
        if let ExpiryGuard::RequireExpiredBefore(cutoff) = expiry {
            let still_live = job.lease_expires_at.map_or(false, |expires| expires >= *cutoff);
            if still_live {
                // A heartbeat won the race against the sweeper.
                return Ok(TransitionOutcome::Stale);
            }
        }

        let job = self.jobs.get_mut(&id).expect("checked above");
        if let Some(expires) = job.lease_expires_at {
            let key = (expires, job.id);
            self.leased.remove(&key);
        }
        job.lease_token = None;
        job.lease_expires_at = None;
        job.leased_by = None;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        match disposition {
            FailDisposition::Retry { next_run_at } => {
                job.status = JobStatus::Pending;
                job.run_at = job.run_at.max(next_run_at);
                let key = (job.run_at, job.id);
                self.pending.insert(key);
            }
            FailDisposition::Dead => {
                job.status = JobStatus::Dead;
            }
        }
        Ok(TransitionOutcome::Applied)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> QueueResult<()> {
        let mut inner = self.inner.lock();
        if job.status == JobStatus::Pending {
            inner.pending.insert((job.run_at, job.id));
        }
        inner.order.push(job.id);
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        Ok(self.inner.lock().jobs.get(&id).cloned())
    }

    async fn claimable(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock();
        let jobs = inner
            .pending
            .iter()
            .take_while(|(run_at, _)| *run_at <= now)
            .take(limit)
            .filter_map(|(_, id)| inner.jobs.get(id).cloned())
            .collect();
        Ok(jobs)
    }

    async fn try_claim(
        &self,
        id: JobId,
        claim: LeaseClaim,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get(&id) else {
            return Err(QueueError::not_found(id));
        };
        if !job.is_claimable(now) {
            // Lost the race, or the job is no longer due.
            return Ok(None);
        }

        let key = (job.run_at, job.id);
        inner.pending.remove(&key);
        let job = inner.jobs.get_mut(&id).expect("checked above");
        job.status = JobStatus::Leased;
        job.attempt += 1;
        job.lease_token = Some(claim.token);
        job.lease_expires_at = Some(claim.expires_at);
        job.leased_by = Some(claim.worker_id);
        job.updated_at = now;
        let claimed = job.clone();
        inner.leased.insert((claim.expires_at, id));
        Ok(Some(claimed))
    }

    async fn complete(
        &self,
        id: JobId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get(&id) else {
            return Err(QueueError::not_found(id));
        };
        if job.status != JobStatus::Leased {
            return Ok(TransitionOutcome::Stale);
        }
        if job.lease_token != Some(token) {
            return Ok(TransitionOutcome::Conflict);
        }

        let job = inner.jobs.get(&id).expect("checked above").clone();
        inner.drop_lease_index(&job);
        let job = inner.jobs.get_mut(&id).expect("checked above");
        job.status = JobStatus::Completed;
        job.lease_token = None;
        job.lease_expires_at = None;
        job.leased_by = None;
        job.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    async fn fail(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        self.inner
            .lock()
            .fail_guarded(id, token, disposition, error, now, &ExpiryGuard::Ignore)
    }

    async fn reclaim(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        self.inner.lock().fail_guarded(
            id,
            token,
            disposition,
            error,
            now,
            &ExpiryGuard::RequireExpiredBefore(now),
        )
    }

    async fn extend_lease(
        &self,
        id: JobId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        let mut inner = self.inner.lock();
        let Some(job) = inner.jobs.get(&id) else {
            return Err(QueueError::not_found(id));
        };
        if job.status != JobStatus::Leased {
            return Ok(TransitionOutcome::Stale);
        }
        if job.lease_token != Some(token) {
            return Ok(TransitionOutcome::Conflict);
        }

        let job = inner.jobs.get(&id).expect("checked above").clone();
        inner.drop_lease_index(&job);
        let job = inner.jobs.get_mut(&id).expect("checked above");
        job.lease_expires_at = Some(expires_at);
        job.updated_at = now;
        inner.leased.insert((expires_at, id));
        Ok(TransitionOutcome::Applied)
    }

    async fn expired_leases(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock();
        let jobs = inner
            .leased
            .iter()
            .take_while(|(expires, _)| *expires < now)
            .take(limit)
            .filter_map(|(_, id)| inner.jobs.get(id).cloned())
            .collect();
        Ok(jobs)
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock();
        let jobs = inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| status.map_or(true, |wanted| job.status == wanted))
            .take(limit)
            .cloned()
            .collect();
        Ok(jobs)
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let inner = self.inner.lock();
        let mut counts = StatusCounts::default();
        for job in inner.jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Leased => counts.leased += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Dead => counts.dead += 1,
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}
