//! Worker protocol controller: lease, complete, fail, heartbeat.

use axum::{extract::State, routing::post, Json, Router};
use beeline_core::{Job, JobId, JobStatus, LeaseToken, QueueError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use utoipa::ToSchema;

use crate::responses::{ok, ApiResult};
use crate::state::AppState;

/// Creates the worker protocol router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lease", post(lease))
        .route("/complete", post(complete))
        .route("/fail", post(fail))
        .route("/heartbeat", post(heartbeat))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for leasing jobs.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRequest {
    /// Identifier of the requesting worker.
    pub worker_id: String,
    /// Capabilities the worker advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Maximum number of jobs to lease in one call.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Requested lease duration in milliseconds; clamped to the
    /// configured ceiling.
    #[serde(default)]
    pub lease_ms: Option<u64>,
}

fn default_max_batch() -> usize {
    1
}

/// Worker-facing job representation. The only surface that carries the
/// lease token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeasedJob {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub capabilities_required: Vec<String>,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    pub lease_token: LeaseToken,
    pub lease_expires_at: DateTime<Utc>,
}

impl LeasedJob {
    /// A claimed job must carry its lease fields; a bare record here is
    /// a store bug and surfaces as an internal error rather than a lease
    /// that is held but never handed out.
    fn from_job(job: Job) -> Result<Self, QueueError> {
        let id = job.id;
        let missing = move || QueueError::internal(format!("claimed job {id} has no lease fields"));
        Ok(Self {
            lease_token: job.lease_token.ok_or_else(missing)?,
            lease_expires_at: job.lease_expires_at.ok_or_else(missing)?,
            id,
            job_type: job.job_type,
            payload: job.payload,
            capabilities_required: job.capabilities_required,
            status: job.status,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            run_at: job.run_at,
        })
    }
}

/// Response body for a lease request.
#[derive(Debug, Serialize, ToSchema)]
pub struct LeaseResponse {
    /// First claimed job, or null when nothing was eligible.
    pub job: Option<LeasedJob>,
    /// All claimed jobs; present when the request asked for a batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<LeasedJob>>,
}

/// Request body for reporting completion.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Reporting worker, for log correlation only.
    #[serde(default)]
    pub worker_id: Option<String>,
    pub job_id: JobId,
    pub lease_token: LeaseToken,
}

/// Request body for reporting failure.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailRequest {
    #[serde(default)]
    pub worker_id: Option<String>,
    pub job_id: JobId,
    pub lease_token: LeaseToken,
    /// Failure reason recorded as `last_error`.
    pub error: String,
    /// Whether the failure is worth retrying.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

/// Request body for extending a lease.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub job_id: JobId,
    pub lease_token: LeaseToken,
    /// Extension in milliseconds from now; defaults to the configured
    /// lease duration.
    #[serde(default)]
    pub extend_ms: Option<u64>,
}

/// Response body for a heartbeat.
#[derive(Debug, Serialize, ToSchema)]
pub struct HeartbeatResponse {
    /// New lease deadline.
    pub lease_expires_at: DateTime<Utc>,
}

/// Generic acknowledgement body.
#[derive(Debug, Serialize, ToSchema)]
pub struct AckResponse {
    pub status: String,
}

impl AckResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Lease up to `maxBatch` eligible jobs for a worker.
#[utoipa::path(
    post,
    path = "/v1/lease",
    tag = "queue",
    request_body = LeaseRequest,
    responses(
        (status = 200, description = "Lease result; job is null when the queue is idle", body = LeaseResponse),
        (status = 400, description = "Invalid request")
    ),
    security(("bearer_auth" = []))
)]
pub async fn lease(
    State(state): State<AppState>,
    Json(request): Json<LeaseRequest>,
) -> ApiResult<LeaseResponse> {
    let capabilities: HashSet<String> = request.capabilities.into_iter().collect();
    let claimed = state
        .queue
        .lease(
            &request.worker_id,
            &capabilities,
            request.max_batch,
            request.lease_ms,
        )
        .await?;

    let mut jobs = claimed
        .into_iter()
        .map(LeasedJob::from_job)
        .collect::<Result<Vec<_>, _>>()?;
    let batch = (request.max_batch > 1).then(|| jobs.clone());
    let first = if jobs.is_empty() {
        None
    } else {
        Some(jobs.remove(0))
    };

    ok(LeaseResponse {
        job: first,
        jobs: batch,
    })
}

/// Report successful completion of a leased job.
#[utoipa::path(
    post,
    path = "/v1/complete",
    tag = "queue",
    request_body = CompleteRequest,
    responses(
        (status = 200, description = "Completion applied or idempotently ignored", body = AckResponse),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Another worker holds a live lease")
    ),
    security(("bearer_auth" = []))
)]
pub async fn complete(
    State(state): State<AppState>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<AckResponse> {
    state
        .queue
        .complete(request.job_id, request.lease_token)
        .await?;
    ok(AckResponse::ok())
}

/// Report failure of a leased job.
#[utoipa::path(
    post,
    path = "/v1/fail",
    tag = "queue",
    request_body = FailRequest,
    responses(
        (status = 200, description = "Failure applied or idempotently ignored", body = AckResponse),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "Another worker holds a live lease")
    ),
    security(("bearer_auth" = []))
)]
pub async fn fail(
    State(state): State<AppState>,
    Json(request): Json<FailRequest>,
) -> ApiResult<AckResponse> {
    if request.error.trim().is_empty() {
        return Err(QueueError::validation("error must not be empty").into());
    }
    state
        .queue
        .fail(
            request.job_id,
            request.lease_token,
            &request.error,
            request.retryable,
        )
        .await?;
    ok(AckResponse::ok())
}

/// Extend a live lease.
#[utoipa::path(
    post,
    path = "/v1/heartbeat",
    tag = "queue",
    request_body = HeartbeatRequest,
    responses(
        (status = 200, description = "Lease extended", body = HeartbeatResponse),
        (status = 404, description = "Unknown job"),
        (status = 409, description = "The lease has been resolved or re-assigned")
    ),
    security(("bearer_auth" = []))
)]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<HeartbeatResponse> {
    let lease_expires_at = state
        .queue
        .heartbeat(request.job_id, request.lease_token, request.extend_ms)
        .await?;
    ok(HeartbeatResponse { lease_expires_at })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beeline_core::NewJob;
    use chrono::Duration;

    #[test]
    fn test_leased_view_requires_lease_fields() {
        let now = Utc::now();
        let mut job = Job::create(NewJob::new("render"), now, 3);

        // A record without lease fields must not be handed to a worker.
        let err = LeasedJob::from_job(job.clone()).unwrap_err();
        assert_eq!(err.status_code(), 500);

        let token = LeaseToken::new();
        job.status = JobStatus::Leased;
        job.lease_token = Some(token);
        job.lease_expires_at = Some(now + Duration::seconds(60));

        let view = LeasedJob::from_job(job).unwrap();
        assert_eq!(view.lease_token, token);
        assert_eq!(view.attempt, 0);
    }
}
