//! Job store contract.
//!
//! A store holds job records and executes every state transition as a
//! single atomic check-then-write against one record. Correctness of the
//! whole queue rests on that: two workers may race a claim, a worker may
//! race the expiry sweeper, and the store is the only arbiter.

use crate::error::QueueResult;
use crate::job::{Job, JobId, JobStatus, LeaseToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a token-guarded conditional transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The guard matched and the transition was written.
    Applied,
    /// The job has moved on since the token was issued (completed,
    /// reclaimed, or dead-lettered). The report is a no-op; callers
    /// treat it as success so replays stay idempotent.
    Stale,
    /// A different live lease owns the job. The caller must stop acting
    /// on its result.
    Conflict,
}

impl TransitionOutcome {
    /// Returns true if the transition was written.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Lease parameters written by a successful claim.
#[derive(Debug, Clone)]
pub struct LeaseClaim {
    /// Freshly minted ownership token.
    pub token: LeaseToken,
    /// Identifier of the claiming worker.
    pub worker_id: String,
    /// When the lease stops being honored by the sweeper.
    pub expires_at: DateTime<Utc>,
}

/// What a failure transition does with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Re-enter the pending pool, claimable at `next_run_at`.
    Retry { next_run_at: DateTime<Utc> },
    /// Attempts exhausted or failure marked non-retryable; park the job.
    Dead,
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StatusCounts {
    pub pending: u64,
    pub leased: u64,
    pub completed: u64,
    pub dead: u64,
}

impl StatusCounts {
    /// Total number of job records.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.leased + self.completed + self.dead
    }
}

/// Storage contract for job records.
///
/// Implementations must make each transition atomic at the record level:
/// the guard is evaluated and the write applied in one step, with no
/// window where a concurrent caller can observe the guard passing and
/// both apply. Transition methods take `now` explicitly so backends stay
/// deterministic under test.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new pending job record. Ids are caller-generated UUIDs;
    /// the store does not defend against reuse.
    async fn insert(&self, job: Job) -> QueueResult<()>;

    /// Fetches one job by ID.
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Returns pending jobs with `run_at <= now`, ordered by
    /// `(run_at, id)`, at most `limit`.
    async fn claimable(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>>;

    /// Atomically claims a job for a worker.
    ///
    /// Guard: status is `pending` and `run_at <= now`. On success the
    /// record becomes `leased`, `attempt` increments by one, and the
    /// lease fields are written; the updated record is returned. `None`
    /// means the guard no longer held, i.e. the claim lost a race.
    async fn try_claim(
        &self,
        id: JobId,
        claim: LeaseClaim,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>>;

    /// Atomically completes a leased job.
    ///
    /// Guard: status is `leased` and the stored token equals `token`.
    /// On `Applied` the record becomes `completed` and the lease fields
    /// are cleared. Unknown ids produce `NotFound`.
    async fn complete(
        &self,
        id: JobId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome>;

    /// Atomically fails a leased job.
    ///
    /// Guard: status is `leased` and the stored token equals `token`.
    /// `Retry` re-enters `pending` with `run_at` advanced to
    /// `next_run_at` (never moved backwards); `Dead` parks the record.
    /// Either way the lease fields are cleared and `last_error` is set.
    /// `attempt` is not touched; it counts claims, not failures.
    async fn fail(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome>;

    /// Sweeper variant of [`fail`](JobStore::fail) whose guard also
    /// requires `lease_expires_at < now` at write time. A heartbeat that
    /// lands between the expiry scan and this call keeps the lease, and
    /// the reclaim reports `Stale`.
    async fn reclaim(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome>;

    /// Atomically moves the lease expiry of a leased job to `expires_at`.
    ///
    /// Guard: status is `leased` and the stored token equals `token`.
    /// An expired but not yet reclaimed lease can still be extended;
    /// the token stays valid until the sweeper takes it.
    async fn extend_lease(
        &self,
        id: JobId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome>;

    /// Returns leased jobs whose lease expired strictly before `now`,
    /// ordered by expiry, at most `limit`.
    async fn expired_leases(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>>;

    /// Lists jobs, newest creation first, at most `limit`, optionally
    /// filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> QueueResult<Vec<Job>>;

    /// Counts jobs per status.
    async fn counts(&self) -> QueueResult<StatusCounts>;

    /// Probes store reachability, for readiness checks.
    async fn ping(&self) -> QueueResult<()>;
}
