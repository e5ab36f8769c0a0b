//! OpenAPI documentation configuration.

use beeline_core::{ErrorResponse, JobId, JobStatus, LeaseToken};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::controllers::jobs_controller::{
    JobListResponse, JobView, StatsResponse, SubmitJobRequest, SubmitJobResponse,
};
use crate::controllers::queue_controller::{
    AckResponse, CompleteRequest, FailRequest, HeartbeatRequest, HeartbeatResponse, LeaseRequest,
    LeaseResponse, LeasedJob,
};

/// OpenAPI documentation for the Beeline API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Beeline Job Queue API",
        version = "1.0.0",
        description = "Lease-based job queue with at-least-once delivery",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    paths(
        // Worker protocol
        crate::controllers::queue_controller::lease,
        crate::controllers::queue_controller::complete,
        crate::controllers::queue_controller::fail,
        crate::controllers::queue_controller::heartbeat,
        // Jobs
        crate::controllers::jobs_controller::submit_job,
        crate::controllers::jobs_controller::list_jobs,
        crate::controllers::jobs_controller::get_job,
        crate::controllers::jobs_controller::stats,
        // Health
        crate::controllers::health_controller::health_check,
        crate::controllers::health_controller::readiness_check,
        crate::controllers::health_controller::liveness_check,
    ),
    components(
        schemas(
            // Core types
            JobId,
            LeaseToken,
            JobStatus,
            ErrorResponse,
            // Worker protocol DTOs
            LeaseRequest,
            LeaseResponse,
            LeasedJob,
            CompleteRequest,
            FailRequest,
            HeartbeatRequest,
            HeartbeatResponse,
            AckResponse,
            // Job DTOs
            SubmitJobRequest,
            SubmitJobResponse,
            JobView,
            JobListResponse,
            StatsResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "queue", description = "Worker lease protocol"),
        (name = "jobs", description = "Job submission and inspection"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Security addon for static bearer token authentication.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("Static API token authentication"))
                        .build(),
                ),
            );
        }
    }
}
