//! Job submission and read-side controller.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use beeline_core::{Job, JobId, JobStatus, NewJob, QueueError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::responses::{created, ok, ApiResult, AppError};
use crate::state::AppState;

/// Creates the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/stats", get(stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    /// Job type name, e.g. `email.send`.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Earliest claim time; defaults to now.
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    /// Capabilities a worker must possess.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Per-job attempt budget; defaults from config.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Response body for a submitted job.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitJobResponse {
    pub id: JobId,
    pub status: JobStatus,
}

/// Read-side job representation. Deliberately omits the lease token;
/// only the lease response hands that to the claiming worker.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct JobView {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub capabilities_required: Vec<String>,
    pub status: JobStatus,
    pub attempt: u32,
    pub max_attempts: u32,
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            capabilities_required: job.capabilities_required,
            status: job.status,
            attempt: job.attempt,
            max_attempts: job.max_attempts,
            run_at: job.run_at,
            lease_expires_at: job.lease_expires_at,
            leased_by: job.leased_by,
            last_error: job.last_error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status: pending, leased, completed, dead.
    pub status: Option<String>,
    /// Maximum number of jobs to return.
    pub limit: Option<usize>,
}

/// Response body for a job listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
    pub count: usize,
}

/// Queue depth per status.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub pending: u64,
    pub leased: u64,
    pub completed: u64,
    pub dead: u64,
    pub total: u64,
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job.
#[utoipa::path(
    post,
    path = "/v1/jobs",
    tag = "jobs",
    request_body = SubmitJobRequest,
    responses(
        (status = 201, description = "Job accepted", body = SubmitJobResponse),
        (status = 400, description = "Invalid request")
    ),
    security(("bearer_auth" = []))
)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    let job = state
        .queue
        .submit(NewJob {
            job_type: request.job_type,
            payload: request.payload,
            capabilities_required: request.capabilities,
            run_at: request.run_at,
            max_attempts: request.max_attempts,
        })
        .await?;

    Ok(created(SubmitJobResponse {
        id: job.id,
        status: job.status,
    }))
}

/// List jobs, newest first.
#[utoipa::path(
    get,
    path = "/v1/jobs",
    tag = "jobs",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("limit" = Option<usize>, Query, description = "Maximum jobs to return")
    ),
    responses(
        (status = 200, description = "Job listing without lease tokens", body = JobListResponse),
        (status = 400, description = "Unknown status filter")
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<JobListResponse> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            JobStatus::parse(s)
                .ok_or_else(|| QueueError::validation(format!("unknown status: {}", s)))
        })
        .transpose()?;

    let jobs: Vec<JobView> = state
        .queue
        .list(status, params.limit)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();

    let count = jobs.len();
    ok(JobListResponse { jobs, count })
}

/// Fetch a single job.
#[utoipa::path(
    get,
    path = "/v1/jobs/{job_id}",
    tag = "jobs",
    params(("job_id" = Uuid, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Job details", body = JobView),
        (status = 404, description = "Unknown job")
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<JobView> {
    let job = state.queue.get(JobId::from(job_id)).await?;
    ok(JobView::from(job))
}

/// Queue depth counts per status.
#[utoipa::path(
    get,
    path = "/v1/stats",
    tag = "jobs",
    responses(
        (status = 200, description = "Per-status job counts", body = StatsResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn stats(State(state): State<AppState>) -> ApiResult<StatsResponse> {
    let counts = state.queue.stats().await?;
    ok(StatsResponse {
        pending: counts.pending,
        leased: counts.leased,
        completed: counts.completed,
        dead: counts.dead,
        total: counts.total(),
    })
}
