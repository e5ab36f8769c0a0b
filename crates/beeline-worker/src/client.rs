//! HTTP client for the queue's worker protocol.

use anyhow::{bail, Context};
use beeline_core::{JobId, LeaseToken};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

/// A job as handed to the worker by a lease response.
#[derive(Debug, Clone, Deserialize)]
pub struct LeasedJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub capabilities_required: Vec<String>,
    pub attempt: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub lease_token: LeaseToken,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseRequest<'a> {
    worker_id: &'a str,
    capabilities: &'a [String],
    max_batch: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_ms: Option<u64>,
}

#[derive(Deserialize)]
struct LeaseResponse {
    job: Option<LeasedJob>,
    #[serde(default)]
    jobs: Option<Vec<LeasedJob>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    worker_id: &'a str,
    job_id: JobId,
    lease_token: LeaseToken,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FailRequest<'a> {
    worker_id: &'a str,
    job_id: JobId,
    lease_token: LeaseToken,
    error: &'a str,
    retryable: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    job_id: JobId,
    lease_token: LeaseToken,
    #[serde(skip_serializing_if = "Option::is_none")]
    extend_ms: Option<u64>,
}

#[derive(Deserialize)]
struct HeartbeatResponse {
    lease_expires_at: DateTime<Utc>,
}

/// Client for the queue server's worker protocol.
#[derive(Clone)]
pub struct QueueClient {
    http: Client,
    base_url: String,
    worker_id: String,
    api_token: Option<String>,
}

impl QueueClient {
    /// Creates a client for the given server and worker identity.
    #[must_use]
    pub fn new(server_url: &str, worker_id: &str, api_token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: server_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
            api_token,
        }
    }

    /// The worker identity presented on every request.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let mut builder = self.http.post(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Leases up to `max_batch` jobs matching the worker's capabilities.
    pub async fn lease(
        &self,
        capabilities: &[String],
        max_batch: usize,
        lease_ms: Option<u64>,
    ) -> anyhow::Result<Vec<LeasedJob>> {
        let response = self
            .post("/v1/lease")
            .json(&LeaseRequest {
                worker_id: &self.worker_id,
                capabilities,
                max_batch,
                lease_ms,
            })
            .send()
            .await
            .context("lease request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("lease rejected: {} {}", status, text);
        }

        let body: LeaseResponse = response
            .json()
            .await
            .context("failed to parse lease response")?;
        Ok(body.jobs.unwrap_or_else(|| body.job.into_iter().collect()))
    }

    /// Reports successful completion of a leased job.
    pub async fn complete(&self, job_id: JobId, lease_token: LeaseToken) -> anyhow::Result<()> {
        let response = self
            .post("/v1/complete")
            .json(&CompleteRequest {
                worker_id: &self.worker_id,
                job_id,
                lease_token,
            })
            .send()
            .await
            .context("complete request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("complete rejected: {} {}", status, text);
        }
        Ok(())
    }

    /// Reports failure of a leased job.
    pub async fn fail(
        &self,
        job_id: JobId,
        lease_token: LeaseToken,
        error: &str,
        retryable: bool,
    ) -> anyhow::Result<()> {
        let response = self
            .post("/v1/fail")
            .json(&FailRequest {
                worker_id: &self.worker_id,
                job_id,
                lease_token,
                error,
                retryable,
            })
            .send()
            .await
            .context("fail request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("fail rejected: {} {}", status, text);
        }
        Ok(())
    }

    /// Extends the lease on a job the worker is still processing.
    ///
    /// A conflict means the lease has been reclaimed; the caller should
    /// abandon the job.
    pub async fn heartbeat(
        &self,
        job_id: JobId,
        lease_token: LeaseToken,
        extend_ms: Option<u64>,
    ) -> anyhow::Result<DateTime<Utc>> {
        let response = self
            .post("/v1/heartbeat")
            .json(&HeartbeatRequest {
                job_id,
                lease_token,
                extend_ms,
            })
            .send()
            .await
            .context("heartbeat request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("heartbeat rejected: {} {}", status, text);
        }

        let body: HeartbeatResponse = response
            .json()
            .await
            .context("failed to parse heartbeat response")?;
        Ok(body.lease_expires_at)
    }
}
