//! Job record, identifiers, and status definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Opaque lease ownership token.
///
/// A fresh token is minted for every successful claim and never reused.
/// Holding the token that matches the job record is the sole proof of
/// lease ownership; wall-clock expiry alone does not revoke it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// Mints a new random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LeaseToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for LeaseToken {
    fn from(token: Uuid) -> Self {
        Self(token)
    }
}

/// Job status enumeration.
///
/// These are the states a job record can rest in. A failed-but-retryable
/// job never rests: the failure transition re-enters `Pending` with a
/// future `run_at` in the same atomic step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum JobStatus {
    /// Job is waiting to be claimed once `run_at` is due.
    Pending,
    /// Job is held under a live lease by a worker.
    Leased,
    /// Job finished successfully; terminal.
    Completed,
    /// Job exhausted its attempts or failed permanently; terminal.
    Dead,
}

impl JobStatus {
    /// Returns the wire representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Leased => "leased",
            JobStatus::Completed => "completed",
            JobStatus::Dead => "dead",
        }
    }

    /// Parses a wire representation, e.g. from a query parameter.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "leased" => Some(JobStatus::Leased),
            "completed" => Some(JobStatus::Completed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Pending
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID.
    pub id: JobId,

    /// Job type name, e.g. `email.send`.
    #[serde(rename = "type")]
    pub job_type: String,

    /// Arbitrary JSON payload handed to the worker.
    pub payload: serde_json::Value,

    /// Capabilities a worker must all possess to claim this job.
    pub capabilities_required: Vec<String>,

    /// Current status.
    pub status: JobStatus,

    /// Number of claims issued so far. Incremented at claim time, so a
    /// job being worked on its first try has `attempt == 1`.
    pub attempt: u32,

    /// Maximum claims before the job is dead-lettered.
    pub max_attempts: u32,

    /// Earliest time the job may be claimed. Never moves backwards.
    pub run_at: DateTime<Utc>,

    /// Token of the current lease, if leased.
    pub lease_token: Option<LeaseToken>,

    /// Expiry of the current lease, if leased.
    pub lease_expires_at: Option<DateTime<Utc>>,

    /// Worker that claimed the current lease, if leased.
    pub leased_by: Option<String>,

    /// Error reported by the most recent failed attempt.
    pub last_error: Option<String>,

    /// Created timestamp.
    pub created_at: DateTime<Utc>,

    /// Updated timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job record from submission parameters.
    ///
    /// `run_at` defaults to `now` and `max_attempts` to the supplied
    /// default when the submitter leaves them unset.
    #[must_use]
    pub fn create(params: NewJob, now: DateTime<Utc>, default_max_attempts: u32) -> Self {
        Self {
            id: JobId::new(),
            job_type: params.job_type,
            payload: params.payload,
            capabilities_required: params.capabilities_required,
            status: JobStatus::Pending,
            attempt: 0,
            max_attempts: params.max_attempts.unwrap_or(default_max_attempts).max(1),
            run_at: params.run_at.unwrap_or(now),
            lease_token: None,
            lease_expires_at: None,
            leased_by: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the job may be claimed at `now`.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    /// Returns true if the job is leased and the lease expired before `now`.
    #[must_use]
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Leased
            && self.lease_expires_at.map_or(false, |expires| expires < now)
    }

    /// Returns true if `token` owns the live lease on this job.
    ///
    /// Ownership is decided by token equality alone; an expired lease
    /// still belongs to its token until the sweeper reclaims it.
    #[must_use]
    pub fn holds_lease(&self, token: LeaseToken) -> bool {
        self.status == JobStatus::Leased && self.lease_token == Some(token)
    }

    /// Returns true if a worker advertising `capabilities` can run this job.
    ///
    /// The worker set must be a superset of the job's requirements; a job
    /// with no requirements matches every worker.
    #[must_use]
    pub fn can_run_on(&self, capabilities: &HashSet<String>) -> bool {
        self.capabilities_required
            .iter()
            .all(|cap| capabilities.contains(cap))
    }

    /// Returns true if no further attempts remain.
    #[must_use]
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Parameters for submitting a new job.
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    /// Job type name.
    pub job_type: String,

    /// JSON payload; `null` when the job carries no data.
    pub payload: serde_json::Value,

    /// Capabilities a worker must possess.
    pub capabilities_required: Vec<String>,

    /// Earliest claim time; `None` means immediately.
    pub run_at: Option<DateTime<Utc>>,

    /// Per-job attempt budget; `None` uses the queue default.
    pub max_attempts: Option<u32>,
}

impl NewJob {
    /// Creates submission parameters for the given job type.
    #[must_use]
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            ..Self::default()
        }
    }
}
