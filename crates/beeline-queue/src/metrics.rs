//! Prometheus metrics for the queue engine.

use beeline_core::StatusCounts;
use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Metric names for the queue engine.
pub mod names {
    /// Total jobs submitted.
    pub const JOBS_SUBMITTED_TOTAL: &str = "beeline_jobs_submitted_total";
    /// Total leases issued.
    pub const JOBS_LEASED_TOTAL: &str = "beeline_jobs_leased_total";
    /// Total jobs completed.
    pub const JOBS_COMPLETED_TOTAL: &str = "beeline_jobs_completed_total";
    /// Total jobs scheduled for retry after a failure report.
    pub const JOBS_RETRIED_TOTAL: &str = "beeline_jobs_retried_total";
    /// Total jobs dead-lettered.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "beeline_jobs_dead_lettered_total";
    /// Total expired leases reclaimed by the sweeper.
    pub const LEASES_RECLAIMED_TOTAL: &str = "beeline_leases_reclaimed_total";
    /// Total ownership conflicts rejected.
    pub const LEASE_CONFLICTS_TOTAL: &str = "beeline_lease_conflicts_total";
    /// Total lease extensions granted.
    pub const LEASES_EXTENDED_TOTAL: &str = "beeline_leases_extended_total";

    /// Current pending jobs.
    pub const JOBS_PENDING: &str = "beeline_jobs_pending";
    /// Current leased jobs.
    pub const JOBS_LEASED: &str = "beeline_jobs_leased";
    /// Current completed jobs.
    pub const JOBS_COMPLETED: &str = "beeline_jobs_completed";
    /// Current dead-lettered jobs.
    pub const JOBS_DEAD: &str = "beeline_jobs_dead";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_SUBMITTED_TOTAL, "Total number of jobs submitted");
    describe_counter!(names::JOBS_LEASED_TOTAL, "Total number of leases issued");
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of jobs scheduled for retry"
    );
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs dead-lettered"
    );
    describe_counter!(
        names::LEASES_RECLAIMED_TOTAL,
        "Total number of expired leases reclaimed by the sweeper"
    );
    describe_counter!(
        names::LEASE_CONFLICTS_TOTAL,
        "Total number of reports rejected for lease ownership conflicts"
    );
    describe_counter!(
        names::LEASES_EXTENDED_TOTAL,
        "Total number of lease extensions granted"
    );

    describe_gauge!(names::JOBS_PENDING, "Current number of pending jobs");
    describe_gauge!(names::JOBS_LEASED, "Current number of leased jobs");
    describe_gauge!(names::JOBS_COMPLETED, "Current number of completed jobs");
    describe_gauge!(names::JOBS_DEAD, "Current number of dead-lettered jobs");
}

/// Queue metrics recorder.
#[derive(Clone)]
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a job submitted.
    pub fn job_submitted(job_type: &str) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a lease issued.
    pub fn job_leased(job_type: &str) {
        counter!(
            names::JOBS_LEASED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job completed.
    pub fn job_completed() {
        counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    }

    /// Record a job scheduled for retry.
    pub fn job_retried(job_type: &str) {
        counter!(
            names::JOBS_RETRIED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job dead-lettered.
    pub fn job_dead_lettered(job_type: &str) {
        counter!(
            names::JOBS_DEAD_LETTERED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record an expired lease reclaimed.
    pub fn lease_reclaimed(job_type: &str) {
        counter!(
            names::LEASES_RECLAIMED_TOTAL,
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record an ownership conflict.
    pub fn lease_conflict() {
        counter!(names::LEASE_CONFLICTS_TOTAL).increment(1);
    }

    /// Record a lease extension.
    pub fn lease_extended() {
        counter!(names::LEASES_EXTENDED_TOTAL).increment(1);
    }

    /// Update per-status depth gauges.
    pub fn update_depths(counts: &StatusCounts) {
        gauge!(names::JOBS_PENDING).set(counts.pending as f64);
        gauge!(names::JOBS_LEASED).set(counts.leased as f64);
        gauge!(names::JOBS_COMPLETED).set(counts.completed as f64);
        gauge!(names::JOBS_DEAD).set(counts.dead as f64);
    }
}
