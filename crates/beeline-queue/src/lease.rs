//! Lease manager: atomic claims of eligible jobs for workers.

use crate::config::LeaseConfig;
use crate::metrics::QueueMetrics;
use beeline_core::{Job, JobStore, LeaseClaim, LeaseToken, QueueResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Hands out time-bounded exclusive leases over pending jobs.
///
/// Selection walks the store's `(run_at, id)`-ordered due list and
/// filters by capabilities; the claim itself is the store's conditional
/// transition, so losing a race to another caller just moves on to the
/// next candidate. A batch of `max_batch` is that loop run to fill,
/// each claim independent.
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    config: LeaseConfig,
}

impl LeaseManager {
    /// Creates a lease manager over the given store.
    pub fn new(store: Arc<dyn JobStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    /// Claims up to `max_batch` eligible jobs for a worker.
    ///
    /// An empty result means no eligible job exists right now; callers
    /// poll with backoff.
    pub async fn claim(
        &self,
        worker_id: &str,
        capabilities: &HashSet<String>,
        max_batch: usize,
        lease_duration: Option<Duration>,
    ) -> QueueResult<Vec<Job>> {
        self.claim_at(Utc::now(), worker_id, capabilities, max_batch, lease_duration)
            .await
    }

    /// [`claim`](Self::claim) with an explicit `now`, for deterministic tests.
    pub async fn claim_at(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
        capabilities: &HashSet<String>,
        max_batch: usize,
        lease_duration: Option<Duration>,
    ) -> QueueResult<Vec<Job>> {
        let batch = max_batch.clamp(1, self.config.max_batch);
        let duration = self.clamp_lease(lease_duration);
        let expires_at = now + ChronoDuration::milliseconds(duration.as_millis() as i64);

        let candidates = self.store.claimable(now, self.config.claim_scan_limit).await?;
        let mut claimed = Vec::new();

        for candidate in candidates {
            if claimed.len() >= batch {
                break;
            }
            if !candidate.can_run_on(capabilities) {
                trace!(
                    job_id = %candidate.id,
                    worker_id = %worker_id,
                    "skipping job, worker lacks required capabilities"
                );
                continue;
            }

            let claim = LeaseClaim {
                token: LeaseToken::new(),
                worker_id: worker_id.to_string(),
                expires_at,
            };
            match self.store.try_claim(candidate.id, claim, now).await? {
                Some(job) => {
                    debug!(
                        job_id = %job.id,
                        worker_id = %worker_id,
                        attempt = job.attempt,
                        lease_expires_at = %expires_at,
                        "job leased"
                    );
                    QueueMetrics::job_leased(&job.job_type);
                    claimed.push(job);
                }
                None => {
                    // Another claimer or the sweeper got here first.
                    trace!(job_id = %candidate.id, "claim lost race, trying next candidate");
                }
            }
        }

        Ok(claimed)
    }

    fn clamp_lease(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(duration) if duration > Duration::ZERO => duration.min(self.config.max_lease()),
            _ => self.config.default_lease(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryJobStore;
    use beeline_core::{JobStatus, NewJob};

    fn manager(store: Arc<MemoryJobStore>) -> LeaseManager {
        LeaseManager::new(store, LeaseConfig::default())
    }

    fn caps(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_claim_empty_queue_returns_empty() {
        let store = Arc::new(MemoryJobStore::new());
        let jobs = manager(store)
            .claim("w-1", &HashSet::new(), 1, None)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_capabilities() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let mut gpu_job = Job::create(NewJob::new("train"), now, 3);
        gpu_job.capabilities_required = vec!["gpu".to_string()];
        store.insert(gpu_job.clone()).await.unwrap();

        let mgr = manager(store);
        let none = mgr.claim_at(now, "w-1", &caps(&["cpu"]), 1, None).await.unwrap();
        assert!(none.is_empty());

        let got = mgr
            .claim_at(now, "w-2", &caps(&["gpu", "cpu"]), 1, None)
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, gpu_job.id);
        assert_eq!(got[0].status, JobStatus::Leased);
    }

    #[tokio::test]
    async fn test_claim_skips_future_run_at() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let mut job = Job::create(NewJob::new("later"), now, 3);
        job.run_at = now + ChronoDuration::seconds(30);
        store.insert(job).await.unwrap();

        let jobs = manager(store)
            .claim_at(now, "w-1", &HashSet::new(), 1, None)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_batch_claims_are_independent() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        for _ in 0..3 {
            store
                .insert(Job::create(NewJob::new("bulk"), now, 3))
                .await
                .unwrap();
        }

        let mgr = manager(store.clone());
        let jobs = mgr
            .claim_at(now, "w-1", &HashSet::new(), 2, None)
            .await
            .unwrap();
        assert_eq!(jobs.len(), 2);
        let tokens: HashSet<_> = jobs.iter().map(|j| j.lease_token.unwrap()).collect();
        assert_eq!(tokens.len(), 2);

        // One job left for the next caller.
        let rest = mgr
            .claim_at(now, "w-2", &HashSet::new(), 5, None)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[tokio::test]
    async fn test_lease_duration_clamped_to_ceiling() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        store
            .insert(Job::create(NewJob::new("long"), now, 3))
            .await
            .unwrap();

        let config = LeaseConfig::default();
        let ceiling = config.max_lease();
        let jobs = manager(store)
            .claim_at(
                now,
                "w-1",
                &HashSet::new(),
                1,
                Some(Duration::from_secs(86_400)),
            )
            .await
            .unwrap();
        let expires = jobs[0].lease_expires_at.unwrap();
        assert_eq!(
            expires,
            now + ChronoDuration::milliseconds(ceiling.as_millis() as i64)
        );
    }
}
