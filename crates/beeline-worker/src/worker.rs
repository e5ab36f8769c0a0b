//! Polling worker loop: lease, process, report, heartbeat.

use crate::client::{LeasedJob, QueueClient};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Failure reported back to the queue by a handler.
#[derive(Debug)]
pub struct JobFailure {
    /// Reason recorded as the job's `last_error`.
    pub message: String,
    /// Whether the queue should retry the job.
    pub retryable: bool,
}

impl JobFailure {
    /// A failure worth retrying.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure; the job is dead-lettered.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Processes jobs of one type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &LeasedJob) -> Result<(), JobFailure>;
}

/// Worker configuration.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Queue server URL, e.g. `http://localhost:8080`.
    pub server_url: String,
    /// Worker identity recorded on leases.
    pub worker_id: String,
    /// Capabilities advertised on every lease request.
    pub capabilities: Vec<String>,
    /// Maximum jobs processed concurrently.
    pub concurrency: usize,
    /// Lease duration requested per claim, in milliseconds.
    pub lease_ms: u64,
    /// Sleep between polls when the queue is idle, in milliseconds.
    pub poll_interval_ms: u64,
    /// Interval between lease extensions for in-flight jobs, in
    /// milliseconds. Should be well under `lease_ms`.
    pub heartbeat_interval_ms: u64,
    /// Static API token, when the server requires one.
    pub api_token: Option<String>,
}

impl WorkerConfig {
    /// Reads configuration from `BEELINE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let server_url = std::env::var("BEELINE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let worker_id = std::env::var("BEELINE_WORKER_ID")
            .unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4()));
        let capabilities = std::env::var("BEELINE_CAPABILITIES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let concurrency = env_parse("BEELINE_CONCURRENCY", 10);
        let lease_ms = env_parse("BEELINE_LEASE_MS", 60_000);
        let poll_interval_ms = env_parse("BEELINE_POLL_INTERVAL_MS", 500);
        let heartbeat_interval_ms = env_parse("BEELINE_HEARTBEAT_INTERVAL_MS", 20_000);
        let api_token = std::env::var("BEELINE_API_TOKEN").ok();

        Self {
            server_url,
            worker_id,
            capabilities,
            concurrency,
            lease_ms,
            poll_interval_ms,
            heartbeat_interval_ms,
            api_token,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Polling worker with a handler registry keyed by job type.
pub struct Worker {
    client: QueueClient,
    config: WorkerConfig,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl Worker {
    /// Creates a worker from configuration.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        let client = QueueClient::new(
            &config.server_url,
            &config.worker_id,
            config.api_token.clone(),
        );
        Self {
            client,
            config,
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler for a job type.
    #[must_use]
    pub fn register(mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.into(), handler);
        self
    }

    /// Runs the poll loop until the task is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let worker = Arc::new(self);

        info!(
            worker_id = %worker.client.worker_id(),
            concurrency = worker.config.concurrency,
            lease_ms = worker.config.lease_ms,
            poll_interval_ms = worker.config.poll_interval_ms,
            server_url = %worker.config.server_url,
            "worker started"
        );

        loop {
            let batch = worker.config.concurrency.max(1);
            let jobs = match worker
                .client
                .lease(
                    &worker.config.capabilities,
                    batch,
                    Some(worker.config.lease_ms),
                )
                .await
            {
                Ok(jobs) => jobs,
                Err(e) => {
                    warn!(error = %e, "lease poll failed");
                    tokio::time::sleep(Duration::from_millis(worker.config.poll_interval_ms))
                        .await;
                    continue;
                }
            };

            if jobs.is_empty() {
                tokio::time::sleep(Duration::from_millis(worker.config.poll_interval_ms)).await;
                continue;
            }

            for job in jobs {
                let permit = semaphore.clone().acquire_owned().await?;
                let worker = worker.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.process_one(job).await;
                });
            }
        }
    }

    async fn process_one(&self, job: LeasedJob) {
        let job_id = job.id;
        let token = job.lease_token;

        debug!(
            job_id = %job_id,
            job_type = %job.job_type,
            attempt = job.attempt,
            "processing job"
        );

        // Keep the lease alive while the handler runs.
        let heartbeat = {
            let client = self.client.clone();
            let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
            let extend_ms = self.config.lease_ms;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                tick.tick().await; // immediate first tick
                loop {
                    tick.tick().await;
                    match client.heartbeat(job_id, token, Some(extend_ms)).await {
                        Ok(expires_at) => {
                            debug!(job_id = %job_id, lease_expires_at = %expires_at, "lease extended");
                        }
                        Err(e) => {
                            // Reclaimed or resolved; the report will sort it out.
                            warn!(job_id = %job_id, error = %e, "heartbeat failed, stopping");
                            break;
                        }
                    }
                }
            })
        };

        let outcome = match self.handlers.get(&job.job_type) {
            Some(handler) => handler.handle(&job).await,
            None => Err(JobFailure::permanent(format!(
                "no handler registered for job type {}",
                job.job_type
            ))),
        };

        heartbeat.abort();

        let report = match outcome {
            Ok(()) => {
                info!(job_id = %job_id, job_type = %job.job_type, "job completed");
                self.client.complete(job_id, token).await
            }
            Err(failure) => {
                warn!(
                    job_id = %job_id,
                    job_type = %job.job_type,
                    retryable = failure.retryable,
                    error = %failure.message,
                    "job failed"
                );
                self.client
                    .fail(job_id, token, &failure.message, failure.retryable)
                    .await
            }
        };

        if let Err(e) = report {
            // A conflict here means the lease was reclaimed mid-flight;
            // the queue has already rescheduled the job.
            warn!(job_id = %job_id, error = %e, "failed to report job outcome");
        }
    }
}
