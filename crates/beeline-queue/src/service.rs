//! Queue service facade wiring the engine parts together.

use crate::config::QueueConfig;
use crate::lease::LeaseManager;
use crate::metrics::QueueMetrics;
use crate::outcome::OutcomeHandler;
use crate::retry::RetryPolicy;
use beeline_core::{
    Job, JobId, JobStatus, JobStore, LeaseToken, NewJob, QueueError, QueueResult, StatusCounts,
    TransitionOutcome,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Facade over the lease manager, outcome handler, and read paths.
///
/// One instance is shared by the HTTP boundary and the sweeper; it owns
/// no background tasks itself.
pub struct QueueService {
    store: Arc<dyn JobStore>,
    lease: LeaseManager,
    outcome: OutcomeHandler,
    config: QueueConfig,
}

impl QueueService {
    /// Creates a service over the given store with a clock-seeded policy.
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        Self::with_retry_policy(store, config, retry)
    }

    /// Creates a service with an explicit retry policy, for tests that
    /// need seeded jitter.
    pub fn with_retry_policy(
        store: Arc<dyn JobStore>,
        config: QueueConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lease: LeaseManager::new(store.clone(), config.lease.clone()),
            outcome: OutcomeHandler::new(store.clone(), retry),
            store,
            config,
        }
    }

    /// The underlying store, for readiness probes and the sweeper.
    #[must_use]
    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Submits a new job, returning the stored record.
    pub async fn submit(&self, params: NewJob) -> QueueResult<Job> {
        if params.job_type.trim().is_empty() {
            return Err(QueueError::validation("job type must not be empty"));
        }

        let job = Job::create(params, Utc::now(), self.config.retry.max_attempts);
        self.store.insert(job.clone()).await?;
        info!(job_id = %job.id, job_type = %job.job_type, run_at = %job.run_at, "job submitted");
        QueueMetrics::job_submitted(&job.job_type);
        Ok(job)
    }

    /// Leases up to `max_batch` jobs for a worker.
    pub async fn lease(
        &self,
        worker_id: &str,
        capabilities: &HashSet<String>,
        max_batch: usize,
        lease_ms: Option<u64>,
    ) -> QueueResult<Vec<Job>> {
        if worker_id.trim().is_empty() {
            return Err(QueueError::validation("workerId must not be empty"));
        }
        let duration = lease_ms.map(Duration::from_millis);
        self.lease.claim(worker_id, capabilities, max_batch, duration).await
    }

    /// Applies a completion report.
    pub async fn complete(&self, id: JobId, token: LeaseToken) -> QueueResult<()> {
        self.outcome.complete(id, token).await
    }

    /// Applies a failure report.
    pub async fn fail(
        &self,
        id: JobId,
        token: LeaseToken,
        error: &str,
        retryable: bool,
    ) -> QueueResult<()> {
        self.outcome.fail(id, token, error, retryable).await
    }

    /// Extends a live lease by `extend_ms` (default: configured lease
    /// duration) from now.
    pub async fn heartbeat(
        &self,
        id: JobId,
        token: LeaseToken,
        extend_ms: Option<u64>,
    ) -> QueueResult<DateTime<Utc>> {
        let now = Utc::now();
        let extend = match extend_ms {
            Some(ms) if ms > 0 => {
                Duration::from_millis(ms).min(self.config.lease.max_lease())
            }
            _ => self.config.lease.default_lease(),
        };
        let expires_at = now + ChronoDuration::milliseconds(extend.as_millis() as i64);

        match self.store.extend_lease(id, token, expires_at, now).await? {
            TransitionOutcome::Applied => {
                debug!(job_id = %id, lease_expires_at = %expires_at, "lease extended");
                QueueMetrics::lease_extended();
                Ok(expires_at)
            }
            // A heartbeat for a resolved lease has nothing to extend.
            TransitionOutcome::Stale => Err(QueueError::conflict(format!(
                "job {} is no longer leased",
                id
            ))),
            TransitionOutcome::Conflict => Err(QueueError::conflict(format!(
                "job {} is leased by another worker",
                id
            ))),
        }
    }

    /// Fetches one job by id.
    pub async fn get(&self, id: JobId) -> QueueResult<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id))
    }

    /// Lists jobs, newest first, clamped to the configured maximum.
    pub async fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> QueueResult<Vec<Job>> {
        let limit = limit
            .unwrap_or(self.config.list.default_limit)
            .clamp(1, self.config.list.max_limit);
        self.store.list(status, limit).await
    }

    /// Per-status depth counts; also refreshes the depth gauges.
    pub async fn stats(&self) -> QueueResult<StatusCounts> {
        let counts = self.store.counts().await?;
        QueueMetrics::update_depths(&counts);
        Ok(counts)
    }

    /// Store reachability probe for readiness checks.
    pub async fn ping(&self) -> QueueResult<()> {
        self.store.ping().await
    }
}
