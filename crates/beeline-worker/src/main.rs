//! Demo worker binary.
//!
//! Registers two example handlers: `demo.sleep` sleeps for
//! `payload.duration_ms` and completes, `demo.flaky` fails retryably
//! unless `payload.succeed` is true.

use async_trait::async_trait;
use beeline_worker::{JobFailure, JobHandler, LeasedJob, Worker, WorkerConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

struct SleepHandler;

#[async_trait]
impl JobHandler for SleepHandler {
    async fn handle(&self, job: &LeasedJob) -> Result<(), JobFailure> {
        let duration_ms = job
            .payload
            .get("duration_ms")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(1_000);
        info!(job_id = %job.id, duration_ms, "sleeping");
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        Ok(())
    }
}

struct FlakyHandler;

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn handle(&self, job: &LeasedJob) -> Result<(), JobFailure> {
        let succeed = job
            .payload
            .get("succeed")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        if succeed {
            Ok(())
        } else {
            Err(JobFailure::retryable("flaky handler declined"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env();
    let worker = Worker::new(config)
        .register("demo.sleep", Arc::new(SleepHandler))
        .register("demo.flaky", Arc::new(FlakyHandler));

    tokio::select! {
        result = worker.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
