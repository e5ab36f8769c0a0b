//! Expiry sweeper: reclaims jobs whose lease lapsed without a report.

use crate::config::SweepConfig;
use crate::metrics::QueueMetrics;
use crate::outcome::OutcomeHandler;
use crate::retry::RetryPolicy;
use beeline_core::{JobStore, QueueError, QueueResult, TransitionOutcome};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Reason string recorded on reclaimed jobs.
const LEASE_EXPIRED: &str = "lease expired";

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Expired leases found by the scan.
    pub scanned: usize,
    /// Jobs returned to the pending pool with backoff.
    pub retried: usize,
    /// Jobs dead-lettered for exhausted attempts.
    pub dead_lettered: usize,
    /// Jobs skipped because a worker report or heartbeat won the race.
    pub skipped: usize,
}

/// Background loop that treats every expired lease as a retryable
/// failure reported on the crashed worker's behalf.
///
/// Each reclaim goes through the same token-guarded transition as an
/// explicit `fail`, and the store re-checks expiry at write time, so a
/// completion or heartbeat landing in the race window wins. That also
/// makes concurrent sweeper instances safe; no coordination needed.
pub struct ExpirySweeper {
    store: Arc<dyn JobStore>,
    handler: OutcomeHandler,
    config: SweepConfig,
    shutdown_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl ExpirySweeper {
    /// Creates a sweeper over the given store.
    pub fn new(store: Arc<dyn JobStore>, retry: RetryPolicy, config: SweepConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            handler: OutcomeHandler::new(store.clone(), retry),
            store,
            config,
            shutdown_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true while the sweep loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the sweep loop until [`stop`](Self::stop) is called.
    pub async fn run(&self) -> QueueResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Configuration(
                "sweeper already running".to_string(),
            ));
        }

        info!(
            interval_ms = self.config.interval_ms,
            batch_size = self.config.batch_size,
            "expiry sweeper started"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut tick = interval(self.config.interval());

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tick.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(stats) if stats.scanned > 0 => {
                            debug!(
                                scanned = stats.scanned,
                                retried = stats.retried,
                                dead_lettered = stats.dead_lettered,
                                skipped = stats.skipped,
                                "sweep pass reclaimed expired leases"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "sweep pass failed");
                        }
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("expiry sweeper stopped");
        Ok(())
    }

    /// Signals the sweep loop to stop after the current pass.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Performs a single sweep pass at `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> QueueResult<SweepStats> {
        let expired = self.store.expired_leases(now, self.config.batch_size).await?;
        let mut stats = SweepStats {
            scanned: expired.len(),
            ..SweepStats::default()
        };

        for job in expired {
            let Some(token) = job.lease_token else {
                // The scan raced a transition that already cleared the lease.
                stats.skipped += 1;
                continue;
            };
            let disposition = self.handler.disposition_for(&job, true, now);
            let outcome = self
                .store
                .reclaim(job.id, token, disposition, LEASE_EXPIRED, now)
                .await;
            match outcome {
                Ok(TransitionOutcome::Applied) => {
                    if matches!(disposition, beeline_core::FailDisposition::Dead) {
                        warn!(
                            job_id = %job.id,
                            attempt = job.attempt,
                            leased_by = job.leased_by.as_deref().unwrap_or("unknown"),
                            "expired lease dead-lettered, attempts exhausted"
                        );
                        QueueMetrics::job_dead_lettered(&job.job_type);
                        stats.dead_lettered += 1;
                    } else {
                        debug!(
                            job_id = %job.id,
                            attempt = job.attempt,
                            leased_by = job.leased_by.as_deref().unwrap_or("unknown"),
                            "expired lease reclaimed to pending"
                        );
                        stats.retried += 1;
                    }
                    QueueMetrics::lease_reclaimed(&job.job_type);
                }
                Ok(_) => {
                    // Last valid token won; the worker reported in time.
                    stats.skipped += 1;
                }
                Err(QueueError::NotFound { .. }) => {
                    stats.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::memory::MemoryJobStore;
    use beeline_core::{Job, JobStatus, LeaseClaim, LeaseToken, NewJob};
    use chrono::Duration;

    fn sweeper(store: Arc<MemoryJobStore>) -> ExpirySweeper {
        let retry = RetryPolicy::new(&RetryConfig::default()).without_jitter();
        ExpirySweeper::new(store, retry, SweepConfig::default())
    }

    async fn lease(
        store: &MemoryJobStore,
        now: DateTime<Utc>,
        max_attempts: u32,
        lease_secs: i64,
    ) -> (Job, LeaseToken) {
        let job = Job::create(NewJob::new("crashy"), now, max_attempts);
        store.insert(job.clone()).await.unwrap();
        let token = LeaseToken::new();
        let claimed = store
            .try_claim(
                job.id,
                LeaseClaim {
                    token,
                    worker_id: "w-1".to_string(),
                    expires_at: now + Duration::seconds(lease_secs),
                },
                now,
            )
            .await
            .unwrap()
            .unwrap();
        (claimed, token)
    }

    #[tokio::test]
    async fn test_sweep_reclaims_expired_lease_with_backoff() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, _token) = lease(&store, now, 3, 5).await;

        let sweeper = sweeper(store.clone());
        // Nothing to do while the lease is live.
        let stats = sweeper.sweep_once(now + Duration::seconds(4)).await.unwrap();
        assert_eq!(stats, SweepStats::default());

        let sweep_time = now + Duration::seconds(6);
        let stats = sweeper.sweep_once(sweep_time).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.retried, 1);

        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempt, 1);
        assert_eq!(stored.run_at, sweep_time + Duration::seconds(1));
        assert_eq!(stored.last_error.as_deref(), Some("lease expired"));
        assert!(stored.lease_token.is_none());
    }

    #[tokio::test]
    async fn test_sweep_dead_letters_exhausted_job() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, _token) = lease(&store, now, 1, 5).await;

        let stats = sweeper(store.clone())
            .sweep_once(now + Duration::seconds(6))
            .await
            .unwrap();
        assert_eq!(stats.dead_lettered, 1);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Dead);
    }

    #[tokio::test]
    async fn test_late_completion_after_reclaim_is_noop() {
        let store = Arc::new(MemoryJobStore::new());
        let now = Utc::now();
        let (job, old_token) = lease(&store, now, 3, 5).await;

        let sweep_time = now + Duration::seconds(6);
        sweeper(store.clone()).sweep_once(sweep_time).await.unwrap();

        // The zombie worker's report must not resurrect the job.
        let outcome = store.complete(job.id, old_token, sweep_time).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Stale);

        // A new worker can lease and complete it.
        let retry_due = store.get(job.id).await.unwrap().unwrap().run_at;
        let new_token = LeaseToken::new();
        store
            .try_claim(
                job.id,
                LeaseClaim {
                    token: new_token,
                    worker_id: "w-2".to_string(),
                    expires_at: retry_due + Duration::seconds(30),
                },
                retry_due,
            )
            .await
            .unwrap()
            .unwrap();
        // The old token now conflicts with worker B's live lease.
        let outcome = store.complete(job.id, old_token, retry_due).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Conflict);

        let outcome = store.complete(job.id, new_token, retry_due).await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);
    }

    #[tokio::test]
    async fn test_sweeper_loop_start_stop() {
        let store = Arc::new(MemoryJobStore::new());
        let retry = RetryPolicy::new(&RetryConfig::default());
        let sweeper = Arc::new(ExpirySweeper::new(
            store,
            retry,
            SweepConfig {
                enabled: true,
                interval_ms: 10,
                batch_size: 10,
            },
        ));

        let task = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sweeper.is_running());

        sweeper.stop();
        task.await.unwrap().unwrap();
        assert!(!sweeper.is_running());
    }
}
