//! Postgres-backed broker.
//!
//! Jobs live in `pushdeck_jobs`. Claiming uses `FOR UPDATE SKIP LOCKED`, so any
//! number of worker processes can poll the same queue. State transitions reuse
//! the [`Job`] state machine inside a transaction; the visibility lock columns
//! (`locked_until`, `lock_token`) outlive the transaction, which keeps a job
//! owned while its handler runs without holding a connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::retention::RetentionPolicy;
use super::store::{Broker, BrokerError, ClaimedJob, DEFAULT_VISIBILITY_TIMEOUT, JobStats, NewJob};
use super::types::{Job, JobAttemptRecord, JobId, JobKind, JobStatus, RetryPolicy, to_chrono};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS pushdeck_jobs (
        id UUID PRIMARY KEY,
        queue TEXT NOT NULL,
        kind TEXT NOT NULL,
        payload JSONB NOT NULL,
        status TEXT NOT NULL,
        last_error TEXT,
        retry_policy JSONB NOT NULL,
        attempt INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        scheduled_at TIMESTAMPTZ,
        started_at TIMESTAMPTZ,
        finished_at TIMESTAMPTZ,
        locked_until TIMESTAMPTZ,
        lock_token UUID,
        return_value JSONB,
        history JSONB NOT NULL DEFAULT '[]'::jsonb
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS pushdeck_jobs_claim_idx
        ON pushdeck_jobs (queue, status, scheduled_at)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS pushdeck_jobs_finished_idx
        ON pushdeck_jobs (status, finished_at)
    "#,
];

const COLUMNS: &str = "id, queue, kind, payload, status, last_error, retry_policy, attempt, \
     created_at, updated_at, scheduled_at, started_at, finished_at, locked_until, lock_token, \
     return_value, history";

#[derive(Debug, Clone)]
pub struct PostgresBroker {
    pool: Arc<PgPool>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
    visibility_timeout: Duration,
}

impl PostgresBroker {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            clock: Arc::new(SystemClock),
            retention: RetentionPolicy::default(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Create the jobs table if it does not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), BrokerError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    /// Enqueue inside the caller's transaction.
    ///
    /// The job becomes visible only if the transaction commits, so a local
    /// write in the same transaction and its job land (or vanish) together.
    #[instrument(skip(self, tx, job), fields(queue = %job.queue, kind = job.kind.as_str()), err)]
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job: NewJob,
    ) -> Result<JobId, BrokerError> {
        let job = job.into_job(self.clock.now());
        insert_job(&mut **tx, &job).await?;
        Ok(job.id)
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, BrokerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }

    /// Load a job for update and apply `f` if `token` still holds its lock.
    async fn update_locked<T>(
        &self,
        operation: &str,
        id: JobId,
        token: Uuid,
        f: impl FnOnce(&mut Job, DateTime<Utc>) -> T,
    ) -> Result<T, BrokerError> {
        let mut tx = self.begin(operation).await?;
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM pushdeck_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let mut job = match row {
            Some(row) => decode_job(&row)?,
            None => return Err(BrokerError::NotFound(id)),
        };

        let now = self.clock.now();
        let expired = job.locked_until.is_some_and(|until| now >= until);
        if !job.holds_lock(token) || expired {
            return Err(BrokerError::LockLost(id));
        }

        let out = f(&mut job, now);
        save_job(&mut *tx, &job).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(out)
    }

    fn cutoffs(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - to_chrono(self.retention.completed),
            now - to_chrono(self.retention.failed),
        )
    }
}

#[async_trait]
impl Broker for PostgresBroker {
    #[instrument(skip(self, job), fields(queue = %job.queue, kind = job.kind.as_str()), err)]
    async fn enqueue(&self, job: NewJob) -> Result<JobId, BrokerError> {
        let job = job.into_job(self.clock.now());
        insert_job(&*self.pool, &job).await?;
        debug!(job_id = %job.id, "job enqueued");
        Ok(job.id)
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, BrokerError> {
        let mut tx = self.begin("claim").await?;
        let now = self.clock.now();

        let row = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM pushdeck_jobs
            WHERE queue = $1
              AND (
                (status IN ('queued', 'delayed') AND (scheduled_at IS NULL OR scheduled_at <= $2))
                OR (status = 'active' AND locked_until <= $2)
              )
            ORDER BY COALESCE(scheduled_at, created_at) ASC, created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#
        ))
        .bind(queue)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("claim", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("claim", e))?;
            return Ok(None);
        };

        let mut job = decode_job(&row)?;
        let token = job.mark_active(now, self.visibility_timeout);
        save_job(&mut *tx, &job).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim", e))?;

        Ok(Some(ClaimedJob { job, token }))
    }

    async fn complete(
        &self,
        id: JobId,
        token: Uuid,
        return_value: Option<Value>,
    ) -> Result<(), BrokerError> {
        self.update_locked("complete", id, token, |job, now| {
            job.mark_completed(now, return_value)
        })
        .await
    }

    async fn fail(&self, id: JobId, token: Uuid, error: String) -> Result<JobStatus, BrokerError> {
        self.update_locked("fail", id, token, |job, now| {
            job.mark_failed(error, now);
            job.status.clone()
        })
        .await
    }

    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), BrokerError> {
        let timeout = self.visibility_timeout;
        self.update_locked("extend_lock", id, token, |job, now| {
            job.extend_lock(now, timeout)
        })
        .await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, BrokerError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM pushdeck_jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        let now = self.clock.now();
        match row {
            Some(row) => {
                let job = decode_job(&row)?;
                Ok((!self.retention.is_expired(&job, now)).then_some(job))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self) -> Result<usize, BrokerError> {
        let (completed_before, failed_before) = self.cutoffs(self.clock.now());
        let result = sqlx::query(
            r#"
            DELETE FROM pushdeck_jobs
            WHERE (status = 'completed' AND finished_at <= $1)
               OR (status = 'failed' AND finished_at <= $2)
            "#,
        )
        .bind(completed_before)
        .bind(failed_before)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("purge_expired", e))?;

        Ok(result.rows_affected() as usize)
    }

    async fn stats(&self, queue: &str) -> Result<JobStats, BrokerError> {
        let (completed_before, failed_before) = self.cutoffs(self.clock.now());
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM pushdeck_jobs
            WHERE queue = $1
              AND NOT (status = 'completed' AND finished_at <= $2)
              AND NOT (status = 'failed' AND finished_at <= $3)
            GROUP BY status
            "#,
        )
        .bind(queue)
        .bind(completed_before)
        .bind(failed_before)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(corrupt)?;
            let count: i64 = row.try_get("count").map_err(corrupt)?;
            let count = count as usize;
            match status.as_str() {
                "queued" => stats.queued = count,
                "active" => stats.active = count,
                "delayed" => stats.delayed = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}

async fn insert_job<'e, E>(executor: E, job: &Job) -> Result<(), BrokerError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = JobRow::from_job(job)?;
    sqlx::query(
        r#"
        INSERT INTO pushdeck_jobs (
            id, queue, kind, payload, status, last_error, retry_policy, attempt,
            created_at, updated_at, scheduled_at, started_at, finished_at,
            locked_until, lock_token, return_value, history
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
    )
    .bind(row.id)
    .bind(row.queue)
    .bind(row.kind)
    .bind(row.payload)
    .bind(row.status)
    .bind(row.last_error)
    .bind(row.retry_policy)
    .bind(row.attempt)
    .bind(row.created_at)
    .bind(row.updated_at)
    .bind(row.scheduled_at)
    .bind(row.started_at)
    .bind(row.finished_at)
    .bind(row.locked_until)
    .bind(row.lock_token)
    .bind(row.return_value)
    .bind(row.history)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("enqueue", e))?;
    Ok(())
}

async fn save_job<'e, E>(executor: E, job: &Job) -> Result<(), BrokerError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = JobRow::from_job(job)?;
    sqlx::query(
        r#"
        UPDATE pushdeck_jobs SET
            status = $2,
            last_error = $3,
            attempt = $4,
            updated_at = $5,
            scheduled_at = $6,
            started_at = $7,
            finished_at = $8,
            locked_until = $9,
            lock_token = $10,
            return_value = $11,
            history = $12
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(row.status)
    .bind(row.last_error)
    .bind(row.attempt)
    .bind(row.updated_at)
    .bind(row.scheduled_at)
    .bind(row.started_at)
    .bind(row.finished_at)
    .bind(row.locked_until)
    .bind(row.lock_token)
    .bind(row.return_value)
    .bind(row.history)
    .execute(executor)
    .await
    .map_err(|e| map_sqlx_error("save", e))?;
    Ok(())
}

fn decode_job(row: &PgRow) -> Result<Job, BrokerError> {
    JobRow::from_row(row).map_err(corrupt)?.try_into()
}

fn corrupt(err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Storage(format!("failed to decode job row: {err}"))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> BrokerError {
    match err {
        sqlx::Error::Database(db_err) => {
            BrokerError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            BrokerError::Unavailable(format!("{operation}: {err}"))
        }
        _ => BrokerError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct JobRow {
    id: Uuid,
    queue: String,
    kind: String,
    payload: Value,
    status: String,
    last_error: Option<String>,
    retry_policy: Value,
    attempt: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    scheduled_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
    lock_token: Option<Uuid>,
    return_value: Option<Value>,
    history: Value,
}

impl JobRow {
    fn from_job(job: &Job) -> Result<Self, BrokerError> {
        let last_error = match &job.status {
            JobStatus::Delayed { error, .. } | JobStatus::Failed { error, .. } => {
                Some(error.clone())
            }
            _ => None,
        };
        Ok(JobRow {
            id: *job.id.as_uuid(),
            queue: job.queue.clone(),
            kind: job.kind.as_str().to_string(),
            payload: job.payload.clone(),
            status: job.status.name().to_string(),
            last_error,
            retry_policy: serde_json::to_value(&job.retry_policy)
                .map_err(|e| BrokerError::Storage(e.to_string()))?,
            attempt: job.attempt as i32,
            created_at: job.created_at,
            updated_at: job.updated_at,
            scheduled_at: job.scheduled_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            locked_until: job.locked_until,
            lock_token: job.lock_token,
            return_value: job.return_value.clone(),
            history: serde_json::to_value(&job.history)
                .map_err(|e| BrokerError::Storage(e.to_string()))?,
        })
    }
}

impl<'r> FromRow<'r, PgRow> for JobRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            queue: row.try_get("queue")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            last_error: row.try_get("last_error")?,
            retry_policy: row.try_get("retry_policy")?,
            attempt: row.try_get("attempt")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            scheduled_at: row.try_get("scheduled_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            locked_until: row.try_get("locked_until")?,
            lock_token: row.try_get("lock_token")?,
            return_value: row.try_get("return_value")?,
            history: row.try_get("history")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = BrokerError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = JobKind::parse(&row.kind).ok_or_else(|| corrupt(format!("unknown kind {}", row.kind)))?;
        let attempt = row.attempt.max(0) as u32;
        let error = row.last_error.unwrap_or_default();
        let status = match row.status.as_str() {
            "queued" => JobStatus::Queued,
            "active" => JobStatus::Active,
            "delayed" => JobStatus::Delayed { error, attempt },
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed {
                error,
                attempts: attempt,
            },
            other => return Err(corrupt(format!("unknown status {other}"))),
        };
        let retry_policy: RetryPolicy = serde_json::from_value(row.retry_policy).map_err(corrupt)?;
        let history: Vec<JobAttemptRecord> = serde_json::from_value(row.history).map_err(corrupt)?;

        Ok(Job {
            id: JobId::from_uuid(row.id),
            queue: row.queue,
            kind,
            payload: row.payload,
            status,
            retry_policy,
            attempt,
            created_at: row.created_at,
            updated_at: row.updated_at,
            scheduled_at: row.scheduled_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            locked_until: row.locked_until,
            lock_token: row.lock_token,
            return_value: row.return_value,
            history,
        })
    }
}
