//! End-to-end engine tests against the in-memory store.

use beeline_core::{JobStatus, JobStore, NewJob};
use beeline_queue::config::{QueueConfig, RetryConfig};
use beeline_queue::{ExpirySweeper, MemoryJobStore, QueueService, RetryPolicy};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

fn service() -> Arc<QueueService> {
    let store = Arc::new(MemoryJobStore::new());
    let config = QueueConfig::default();
    let retry = RetryPolicy::new(&config.retry).without_jitter();
    Arc::new(QueueService::with_retry_policy(store, config, retry))
}

fn caps(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

#[tokio::test]
async fn test_lifecycle_submit_lease_complete() {
    let svc = service();
    let job = svc
        .submit(NewJob {
            payload: serde_json::json!({"to": "ops@example.com"}),
            ..NewJob::new("email.send")
        })
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 0);

    let leased = svc.lease("w-1", &HashSet::new(), 1, None).await.unwrap();
    assert_eq!(leased.len(), 1);
    let leased = &leased[0];
    assert_eq!(leased.id, job.id);
    assert_eq!(leased.status, JobStatus::Leased);
    assert_eq!(leased.attempt, 1);
    assert_eq!(leased.leased_by.as_deref(), Some("w-1"));
    let token = leased.lease_token.unwrap();

    svc.complete(job.id, token).await.unwrap();
    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.lease_token.is_none());

    // Completion replays are idempotent.
    svc.complete(job.id, token).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_claims_never_double_assign() {
    let svc = service();
    let job = svc.submit(NewJob::new("hot.item")).await.unwrap();

    let handles = (0..10).map(|i| {
        let svc = svc.clone();
        tokio::spawn(async move {
            svc.lease(&format!("w-{}", i), &HashSet::new(), 1, None)
                .await
                .unwrap()
        })
    });

    let mut winners = 0;
    for result in futures::future::join_all(handles).await {
        let leased = result.unwrap();
        assert!(leased.len() <= 1);
        winners += leased.len();
    }
    assert_eq!(winners, 1);

    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Leased);
    assert_eq!(stored.attempt, 1);
}

#[tokio::test]
async fn test_delayed_job_not_leased_before_run_at() {
    let svc = service();
    svc.submit(NewJob {
        run_at: Some(Utc::now() + Duration::hours(1)),
        ..NewJob::new("digest.daily")
    })
    .await
    .unwrap();

    let leased = svc.lease("w-1", &HashSet::new(), 8, None).await.unwrap();
    assert!(leased.is_empty());
}

#[tokio::test]
async fn test_capability_matching() {
    let svc = service();
    let gpu_job = svc
        .submit(NewJob {
            capabilities_required: vec!["gpu".to_string()],
            ..NewJob::new("render.frame")
        })
        .await
        .unwrap();
    let plain_job = svc.submit(NewJob::new("email.send")).await.unwrap();

    // A worker without the capability only sees the plain job.
    let leased = svc.lease("cpu-1", &HashSet::new(), 8, None).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, plain_job.id);

    let leased = svc.lease("gpu-1", &caps(&["gpu"]), 8, None).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, gpu_job.id);
}

#[tokio::test]
async fn test_batch_lease_orders_by_run_at() {
    let svc = service();
    let now = Utc::now();
    let mut ids = Vec::new();
    for offset in [30i64, 10, 20] {
        let job = svc
            .submit(NewJob {
                run_at: Some(now - Duration::seconds(offset)),
                ..NewJob::new("batch.work")
            })
            .await
            .unwrap();
        ids.push((offset, job.id));
    }
    ids.sort_by(|a, b| b.0.cmp(&a.0));

    let leased = svc.lease("w-1", &HashSet::new(), 2, None).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert_eq!(leased[0].id, ids[0].1);
    assert_eq!(leased[1].id, ids[1].1);

    // Every leased job carries its own token.
    assert_ne!(leased[0].lease_token, leased[1].lease_token);
}

#[tokio::test]
async fn test_retryable_failure_backs_off_then_dead_letters() {
    let store = Arc::new(MemoryJobStore::new());
    let config = QueueConfig {
        retry: RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        },
        ..QueueConfig::default()
    };
    let retry = RetryPolicy::new(&config.retry).without_jitter();
    let svc = QueueService::with_retry_policy(store, config, retry);

    let job = svc.submit(NewJob::new("flaky.task")).await.unwrap();

    // Attempt 1 fails; the job re-enters pending with backoff.
    let leased = svc.lease("w-1", &HashSet::new(), 1, None).await.unwrap();
    let token = leased[0].lease_token.unwrap();
    svc.fail(job.id, token, "upstream timeout", true).await.unwrap();

    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.attempt, 1);
    assert!(stored.run_at > Utc::now());
    assert_eq!(stored.last_error.as_deref(), Some("upstream timeout"));

    // Not claimable until the backoff elapses.
    assert!(svc.lease("w-1", &HashSet::new(), 1, None).await.unwrap().is_empty());

    // Attempt 2 fails; the budget is spent and the job is parked.
    let due = svc.get(job.id).await.unwrap().run_at;
    let claimed = svc
        .store()
        .try_claim(
            job.id,
            beeline_core::LeaseClaim {
                token: beeline_core::LeaseToken::new(),
                worker_id: "w-1".to_string(),
                expires_at: due + Duration::seconds(60),
            },
            due,
        )
        .await
        .unwrap()
        .unwrap();
    svc.fail(job.id, claimed.lease_token.unwrap(), "still broken", true)
        .await
        .unwrap();

    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Dead);
    assert_eq!(stored.attempt, 2);
}

#[tokio::test]
async fn test_non_retryable_failure_dead_letters_immediately() {
    let svc = service();
    let job = svc.submit(NewJob::new("bad.payload")).await.unwrap();

    let leased = svc.lease("w-1", &HashSet::new(), 1, None).await.unwrap();
    let token = leased[0].lease_token.unwrap();
    svc.fail(job.id, token, "malformed input", false).await.unwrap();

    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Dead);
    assert_eq!(stored.attempt, 1);
    assert_eq!(stored.last_error.as_deref(), Some("malformed input"));
}

#[tokio::test]
async fn test_crash_recovery_through_sweeper() {
    let store = Arc::new(MemoryJobStore::new());
    let config = QueueConfig::default();
    let retry = RetryPolicy::new(&config.retry).without_jitter();
    let svc = QueueService::with_retry_policy(store.clone(), config.clone(), retry.clone());
    let sweeper = ExpirySweeper::new(store.clone(), retry, config.sweep);

    let job = svc.submit(NewJob::new("crashy.task")).await.unwrap();
    let leased = svc.lease("w-1", &HashSet::new(), 1, Some(5_000)).await.unwrap();
    let dead_token = leased[0].lease_token.unwrap();

    // Worker w-1 crashes; its lease lapses and the sweeper reclaims it.
    let after_expiry = Utc::now() + Duration::seconds(6);
    let stats = sweeper.sweep_once(after_expiry).await.unwrap();
    assert_eq!(stats.retried, 1);

    let stored = svc.get(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.last_error.as_deref(), Some("lease expired"));

    // The crashed worker's token is dead; the replacement completes.
    let due = stored.run_at;
    let claimed = store
        .try_claim(
            job.id,
            beeline_core::LeaseClaim {
                token: beeline_core::LeaseToken::new(),
                worker_id: "w-2".to_string(),
                expires_at: due + Duration::seconds(60),
            },
            due,
        )
        .await
        .unwrap()
        .unwrap();
    let err = svc.heartbeat(job.id, dead_token, None).await.unwrap_err();
    assert_eq!(err.error_code(), "CONFLICT");

    svc.complete(job.id, claimed.lease_token.unwrap()).await.unwrap();
    assert_eq!(svc.get(job.id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_stats_and_listing() {
    let svc = service();
    for i in 0..3 {
        svc.submit(NewJob::new(format!("task.{}", i))).await.unwrap();
    }
    let leased = svc.lease("w-1", &HashSet::new(), 1, None).await.unwrap();
    assert_eq!(leased.len(), 1);

    let counts = svc.stats().await.unwrap();
    assert_eq!(counts.pending, 2);
    assert_eq!(counts.leased, 1);
    assert_eq!(counts.total(), 3);

    let pending = svc.list(Some(JobStatus::Pending), None).await.unwrap();
    assert_eq!(pending.len(), 2);
    let all = svc.list(None, None).await.unwrap();
    assert_eq!(all.len(), 3);
}
