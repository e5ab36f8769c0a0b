//! Redis implementation of the job store.
//!
//! Each job is a hash of scalar fields plus three sorted-set indexes:
//! `pending` scored by `run_at`, `leased` scored by `lease_expires_at`,
//! and `jobs` scored by creation time; terminal statuses are membership
//! sets. Every conditional transition is a single Lua script that
//! re-checks status (and token) server-side before writing, so claims,
//! reports, extensions, and sweeps stay atomic across server instances.

use crate::config::RedisConfig;
use crate::redis::RedisKeys;
use beeline_core::{
    FailDisposition, Job, JobId, JobStatus, JobStore, LeaseClaim, LeaseToken, QueueError,
    QueueResult, StatusCounts, TransitionOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use std::collections::HashMap;
use uuid::Uuid;

const CLAIM_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return 'not_found'
    end
    if status ~= 'pending' then
        return 'lost'
    end
    if tonumber(redis.call('HGET', KEYS[1], 'run_at_ms')) > tonumber(ARGV[2]) then
        return 'lost'
    end
    redis.call('HINCRBY', KEYS[1], 'attempt', 1)
    redis.call('HSET', KEYS[1],
        'status', 'leased',
        'lease_token', ARGV[3],
        'leased_by', ARGV[4],
        'lease_expires_at', ARGV[5],
        'lease_expires_ms', ARGV[6],
        'updated_at', ARGV[7])
    redis.call('ZREM', KEYS[2], ARGV[1])
    redis.call('ZADD', KEYS[3], tonumber(ARGV[6]), ARGV[1])
    return 'claimed'
"#;

const COMPLETE_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return 'not_found'
    end
    if status ~= 'leased' then
        return 'stale'
    end
    if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[2] then
        return 'conflict'
    end
    redis.call('HSET', KEYS[1], 'status', 'completed', 'updated_at', ARGV[3])
    redis.call('HDEL', KEYS[1], 'lease_token', 'leased_by', 'lease_expires_at', 'lease_expires_ms')
    redis.call('ZREM', KEYS[2], ARGV[1])
    redis.call('SADD', KEYS[3], ARGV[1])
    return 'applied'
"#;

// ARGV[8] selects the sweeper variant, which re-checks expiry at write
// time so a heartbeat landing after the scan keeps the lease.
const FAIL_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return 'not_found'
    end
    if status ~= 'leased' then
        return 'stale'
    end
    if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[2] then
        return 'conflict'
    end
    if ARGV[8] == '1' then
        local expires = tonumber(redis.call('HGET', KEYS[1], 'lease_expires_ms'))
        if expires and expires >= tonumber(ARGV[9]) then
            return 'stale'
        end
    end
    redis.call('HDEL', KEYS[1], 'lease_token', 'leased_by', 'lease_expires_at', 'lease_expires_ms')
    redis.call('HSET', KEYS[1], 'last_error', ARGV[6], 'updated_at', ARGV[7])
    redis.call('ZREM', KEYS[2], ARGV[1])
    if ARGV[3] == 'retry' then
        local run_ms = tonumber(redis.call('HGET', KEYS[1], 'run_at_ms'))
        if tonumber(ARGV[5]) >= run_ms then
            run_ms = tonumber(ARGV[5])
            redis.call('HSET', KEYS[1], 'run_at', ARGV[4], 'run_at_ms', ARGV[5])
        end
        redis.call('HSET', KEYS[1], 'status', 'pending')
        redis.call('ZADD', KEYS[3], run_ms, ARGV[1])
    else
        redis.call('HSET', KEYS[1], 'status', 'dead')
        redis.call('SADD', KEYS[4], ARGV[1])
    end
    return 'applied'
"#;

const EXTEND_SCRIPT: &str = r#"
    local status = redis.call('HGET', KEYS[1], 'status')
    if not status then
        return 'not_found'
    end
    if status ~= 'leased' then
        return 'stale'
    end
    if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[2] then
        return 'conflict'
    end
    redis.call('HSET', KEYS[1],
        'lease_expires_at', ARGV[3],
        'lease_expires_ms', ARGV[4],
        'updated_at', ARGV[5])
    redis.call('ZADD', KEYS[2], tonumber(ARGV[4]), ARGV[1])
    return 'applied'
"#;

/// Redis-backed [`JobStore`] shared across server instances.
pub struct RedisJobStore {
    pool: Pool,
    keys: RedisKeys,
}

impl RedisJobStore {
    /// Creates a store over an existing pool.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(&config.key_prefix),
        }
    }

    async fn conn(&self) -> QueueResult<Connection> {
        Ok(self.pool.get().await?)
    }

    async fn fetch_jobs(&self, conn: &mut Connection, ids: Vec<String>) -> QueueResult<Vec<Job>> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let map: HashMap<String, String> = conn.hgetall(self.keys.job(&id)).await?;
            if !map.is_empty() {
                jobs.push(parse_job(&map)?);
            }
        }
        Ok(jobs)
    }

    async fn run_fail_script(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
        check_expiry: bool,
    ) -> QueueResult<TransitionOutcome> {
        let (kind, next_run_at) = match disposition {
            FailDisposition::Retry { next_run_at } => ("retry", next_run_at),
            FailDisposition::Dead => ("dead", now),
        };
        let id_str = id.to_string();
        let mut conn = self.conn().await?;
        let verdict: String = redis::Script::new(FAIL_SCRIPT)
            .key(self.keys.job(&id_str))
            .key(self.keys.leased())
            .key(self.keys.pending())
            .key(self.keys.status("dead"))
            .arg(&id_str)
            .arg(token.to_string())
            .arg(kind)
            .arg(next_run_at.to_rfc3339())
            .arg(next_run_at.timestamp_millis())
            .arg(error)
            .arg(now.to_rfc3339())
            .arg(if check_expiry { "1" } else { "0" })
            .arg(now.timestamp_millis())
            .invoke_async(&mut *conn)
            .await?;
        parse_verdict(&verdict, id)
    }
}

fn parse_verdict(verdict: &str, id: JobId) -> QueueResult<TransitionOutcome> {
    match verdict {
        "applied" => Ok(TransitionOutcome::Applied),
        "stale" => Ok(TransitionOutcome::Stale),
        "conflict" => Ok(TransitionOutcome::Conflict),
        "not_found" => Err(QueueError::not_found(id)),
        other => Err(QueueError::store(format!(
            "unexpected script verdict: {}",
            other
        ))),
    }
}

fn job_fields(job: &Job) -> QueueResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("job_type", job.job_type.clone()),
        ("payload", serde_json::to_string(&job.payload)?),
        (
            "capabilities",
            serde_json::to_string(&job.capabilities_required)?,
        ),
        ("status", job.status.as_str().to_string()),
        ("attempt", job.attempt.to_string()),
        ("max_attempts", job.max_attempts.to_string()),
        ("run_at", job.run_at.to_rfc3339()),
        ("run_at_ms", job.run_at.timestamp_millis().to_string()),
        ("created_at", job.created_at.to_rfc3339()),
        ("created_ms", job.created_at.timestamp_millis().to_string()),
        ("updated_at", job.updated_at.to_rfc3339()),
    ];
    if let Some(token) = job.lease_token {
        fields.push(("lease_token", token.to_string()));
    }
    if let Some(expires) = job.lease_expires_at {
        fields.push(("lease_expires_at", expires.to_rfc3339()));
        fields.push(("lease_expires_ms", expires.timestamp_millis().to_string()));
    }
    if let Some(ref worker) = job.leased_by {
        fields.push(("leased_by", worker.clone()));
    }
    if let Some(ref error) = job.last_error {
        fields.push(("last_error", error.clone()));
    }
    Ok(fields)
}

fn parse_job(map: &HashMap<String, String>) -> QueueResult<Job> {
    let field = |name: &str| -> QueueResult<&String> {
        map.get(name)
            .ok_or_else(|| QueueError::Serialization(format!("job record missing field {}", name)))
    };
    let parse_time = |name: &str| -> QueueResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(field(name)?)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QueueError::Serialization(format!("bad timestamp in {}: {}", name, e)))
    };
    let parse_uuid = |value: &str, name: &str| -> QueueResult<Uuid> {
        Uuid::parse_str(value)
            .map_err(|e| QueueError::Serialization(format!("bad uuid in {}: {}", name, e)))
    };

    let status_raw = field("status")?;
    let status = JobStatus::parse(status_raw)
        .ok_or_else(|| QueueError::Serialization(format!("unknown status {}", status_raw)))?;

    Ok(Job {
        id: JobId::from(parse_uuid(field("id")?, "id")?),
        job_type: field("job_type")?.clone(),
        payload: serde_json::from_str(field("payload")?)?,
        capabilities_required: serde_json::from_str(field("capabilities")?)?,
        status,
        attempt: field("attempt")?
            .parse()
            .map_err(|_| QueueError::Serialization("bad attempt count".to_string()))?,
        max_attempts: field("max_attempts")?
            .parse()
            .map_err(|_| QueueError::Serialization("bad attempt budget".to_string()))?,
        run_at: parse_time("run_at")?,
        lease_token: map
            .get("lease_token")
            .map(|t| parse_uuid(t, "lease_token").map(LeaseToken::from))
            .transpose()?,
        lease_expires_at: map
            .contains_key("lease_expires_at")
            .then(|| parse_time("lease_expires_at"))
            .transpose()?,
        leased_by: map.get("leased_by").cloned(),
        last_error: map.get("last_error").cloned(),
        created_at: parse_time("created_at")?,
        updated_at: parse_time("updated_at")?,
    })
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: Job) -> QueueResult<()> {
        let id = job.id.to_string();
        let fields = job_fields(&job)?;
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(self.keys.job(&id), &fields).ignore();
        pipe.zadd(self.keys.jobs(), &id, job.created_at.timestamp_millis())
            .ignore();
        if job.status == JobStatus::Pending {
            pipe.zadd(self.keys.pending(), &id, job.run_at.timestamp_millis())
                .ignore();
        }
        pipe.query_async::<()>(&mut *conn).await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let map: HashMap<String, String> = conn.hgetall(self.keys.job(&id.to_string())).await?;
        if map.is_empty() {
            return Ok(None);
        }
        parse_job(&map).map(Some)
    }

    async fn claimable(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn
            .zrangebyscore_limit(
                self.keys.pending(),
                "-inf",
                now.timestamp_millis(),
                0,
                limit as isize,
            )
            .await?;
        self.fetch_jobs(&mut conn, ids).await
    }

    async fn try_claim(
        &self,
        id: JobId,
        claim: LeaseClaim,
        now: DateTime<Utc>,
    ) -> QueueResult<Option<Job>> {
        let id_str = id.to_string();
        let mut conn = self.conn().await?;
        let verdict: String = redis::Script::new(CLAIM_SCRIPT)
            .key(self.keys.job(&id_str))
            .key(self.keys.pending())
            .key(self.keys.leased())
            .arg(&id_str)
            .arg(now.timestamp_millis())
            .arg(claim.token.to_string())
            .arg(&claim.worker_id)
            .arg(claim.expires_at.to_rfc3339())
            .arg(claim.expires_at.timestamp_millis())
            .arg(now.to_rfc3339())
            .invoke_async(&mut *conn)
            .await?;

        match verdict.as_str() {
            "claimed" => {
                // The token is not handed out yet, so no other caller can
                // touch this lease between the script and the read-back.
                let map: HashMap<String, String> = conn.hgetall(self.keys.job(&id_str)).await?;
                parse_job(&map).map(Some)
            }
            "lost" => Ok(None),
            "not_found" => Err(QueueError::not_found(id)),
            other => Err(QueueError::store(format!(
                "unexpected script verdict: {}",
                other
            ))),
        }
    }

    async fn complete(
        &self,
        id: JobId,
        token: LeaseToken,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        let id_str = id.to_string();
        let mut conn = self.conn().await?;
        let verdict: String = redis::Script::new(COMPLETE_SCRIPT)
            .key(self.keys.job(&id_str))
            .key(self.keys.leased())
            .key(self.keys.status("completed"))
            .arg(&id_str)
            .arg(token.to_string())
            .arg(now.to_rfc3339())
            .invoke_async(&mut *conn)
            .await?;
        parse_verdict(&verdict, id)
    }

    async fn fail(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        self.run_fail_script(id, token, disposition, error, now, false)
            .await
    }

    async fn reclaim(
        &self,
        id: JobId,
        token: LeaseToken,
        disposition: FailDisposition,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        self.run_fail_script(id, token, disposition, error, now, true)
            .await
    }

    async fn extend_lease(
        &self,
        id: JobId,
        token: LeaseToken,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QueueResult<TransitionOutcome> {
        let id_str = id.to_string();
        let mut conn = self.conn().await?;
        let verdict: String = redis::Script::new(EXTEND_SCRIPT)
            .key(self.keys.job(&id_str))
            .key(self.keys.leased())
            .arg(&id_str)
            .arg(token.to_string())
            .arg(expires_at.to_rfc3339())
            .arg(expires_at.timestamp_millis())
            .arg(now.to_rfc3339())
            .invoke_async(&mut *conn)
            .await?;
        parse_verdict(&verdict, id)
    }

    async fn expired_leases(&self, now: DateTime<Utc>, limit: usize) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        // Strictly-before: a lease expiring exactly at `now` is still live.
        let max = format!("({}", now.timestamp_millis());
        let ids: Vec<String> = conn
            .zrangebyscore_limit(self.keys.leased(), "-inf", max, 0, limit as isize)
            .await?;
        self.fetch_jobs(&mut conn, ids).await
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn().await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(status) = status else {
            let stop = limit.saturating_sub(1) as isize;
            let ids: Vec<String> = conn.zrevrange(self.keys.jobs(), 0, stop).await?;
            return self.fetch_jobs(&mut conn, ids).await;
        };

        // Filtered listings keep the same newest-first order as the
        // unfiltered one: walk the creation index in pages and keep
        // jobs in the requested status.
        let page = limit.max(64) as isize;
        let mut offset = 0isize;
        let mut jobs = Vec::new();
        loop {
            let ids: Vec<String> = conn
                .zrevrange(self.keys.jobs(), offset, offset + page - 1)
                .await?;
            if ids.is_empty() {
                return Ok(jobs);
            }
            offset += ids.len() as isize;
            for job in self.fetch_jobs(&mut conn, ids).await? {
                if job.status == status {
                    jobs.push(job);
                    if jobs.len() == limit {
                        return Ok(jobs);
                    }
                }
            }
        }
    }

    async fn counts(&self) -> QueueResult<StatusCounts> {
        let mut conn = self.conn().await?;
        let pending: u64 = conn.zcard(self.keys.pending()).await?;
        let leased: u64 = conn.zcard(self.keys.leased()).await?;
        let completed: u64 = conn.scard(self.keys.status("completed")).await?;
        let dead: u64 = conn.scard(self.keys.status("dead")).await?;
        Ok(StatusCounts {
            pending,
            leased,
            completed,
            dead,
        })
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}
