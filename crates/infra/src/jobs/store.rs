//! Queue broker contract and the in-memory broker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::clock::{Clock, SystemClock};
use super::retention::RetentionPolicy;
use super::types::{Job, JobId, JobKind, JobStatus, RetryPolicy};

/// How long a claimed job stays invisible to other workers.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Broker error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached; nothing was written.
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    /// The caller's visibility lock expired or was taken over.
    #[error("lock lost on job {0}")]
    LockLost(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub kind: JobKind,
    pub payload: Value,
    pub retry_policy: RetryPolicy,
}

impl NewJob {
    pub fn new(kind: JobKind, payload: Value) -> Self {
        Self {
            queue: kind.queue_name().to_string(),
            kind,
            payload,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub(crate) fn into_job(self, now: chrono::DateTime<chrono::Utc>) -> Job {
        Job::new(self.kind, self.payload, now)
            .with_retry_policy(self.retry_policy)
            .on_queue(self.queue)
    }
}

/// A job handed to exactly one worker, together with its lock token.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub token: Uuid,
}

/// Per-queue counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub queued: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStats {
    pub(crate) fn count(&mut self, status: &JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Active => self.active += 1,
            JobStatus::Delayed { .. } => self.delayed += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed { .. } => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.active + self.delayed + self.completed + self.failed
    }
}

/// Durable, named, at-least-once job store.
///
/// Only one worker holds a given job at a time (visibility lock); a lock that
/// expires hands the job to the next claimant. No ordering is promised within
/// or across queues.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Accept a job. Returns once the job is stored.
    async fn enqueue(&self, job: NewJob) -> Result<JobId, BrokerError>;

    /// Lock and return the next claimable job on `queue`, if any.
    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, BrokerError>;

    /// Finish a claimed job successfully.
    async fn complete(
        &self,
        id: JobId,
        token: Uuid,
        return_value: Option<Value>,
    ) -> Result<(), BrokerError>;

    /// Record a failed attempt; returns the resulting status (`Delayed` or
    /// `Failed`).
    async fn fail(&self, id: JobId, token: Uuid, error: String) -> Result<JobStatus, BrokerError>;

    /// Push the visibility lock forward while the handler still runs.
    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), BrokerError>;

    /// Look up a job. Jobs past their retention window are not returned.
    async fn get(&self, id: JobId) -> Result<Option<Job>, BrokerError>;

    /// Physically remove jobs past their retention window.
    async fn purge_expired(&self) -> Result<usize, BrokerError>;

    async fn stats(&self, queue: &str) -> Result<JobStats, BrokerError>;
}

#[async_trait]
impl<B> Broker for Arc<B>
where
    B: Broker + ?Sized,
{
    async fn enqueue(&self, job: NewJob) -> Result<JobId, BrokerError> {
        (**self).enqueue(job).await
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, BrokerError> {
        (**self).claim(queue).await
    }

    async fn complete(
        &self,
        id: JobId,
        token: Uuid,
        return_value: Option<Value>,
    ) -> Result<(), BrokerError> {
        (**self).complete(id, token, return_value).await
    }

    async fn fail(&self, id: JobId, token: Uuid, error: String) -> Result<JobStatus, BrokerError> {
        (**self).fail(id, token, error).await
    }

    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), BrokerError> {
        (**self).extend_lock(id, token).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, BrokerError> {
        (**self).get(id).await
    }

    async fn purge_expired(&self) -> Result<usize, BrokerError> {
        (**self).purge_expired().await
    }

    async fn stats(&self, queue: &str) -> Result<JobStats, BrokerError> {
        (**self).stats(queue).await
    }
}

/// In-memory broker for tests/dev and single-process deployments.
#[derive(Debug)]
pub struct InMemoryBroker {
    jobs: RwLock<HashMap<JobId, Job>>,
    clock: Arc<dyn Clock>,
    retention: RetentionPolicy,
    visibility_timeout: Duration,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            retention: RetentionPolicy::default(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn poisoned() -> BrokerError {
        BrokerError::Unavailable("in-memory broker lock poisoned".to_string())
    }

    /// Run `f` on the job if `token` still holds its lock.
    fn with_locked_job<T>(
        &self,
        id: JobId,
        token: Uuid,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, BrokerError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let job = jobs.get_mut(&id).ok_or(BrokerError::NotFound(id))?;
        let now = self.clock.now();
        // An expired lock is lost even if nobody has reclaimed the job yet.
        let expired = job.locked_until.is_some_and(|until| now >= until);
        if !job.holds_lock(token) || expired {
            return Err(BrokerError::LockLost(id));
        }
        Ok(f(job))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    #[instrument(skip(self, job), fields(queue = %job.queue, kind = job.kind.as_str()), err)]
    async fn enqueue(&self, job: NewJob) -> Result<JobId, BrokerError> {
        let job = job.into_job(self.clock.now());
        let id = job.id;
        self.jobs
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(id, job);
        debug!(job_id = %id, "job enqueued");
        Ok(id)
    }

    async fn claim(&self, queue: &str) -> Result<Option<ClaimedJob>, BrokerError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let now = self.clock.now();

        let next = jobs
            .values_mut()
            .filter(|j| j.queue == queue && j.is_claimable(now))
            .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.created_at));

        Ok(next.map(|job| {
            let token = job.mark_active(now, self.visibility_timeout);
            ClaimedJob {
                job: job.clone(),
                token,
            }
        }))
    }

    async fn complete(
        &self,
        id: JobId,
        token: Uuid,
        return_value: Option<Value>,
    ) -> Result<(), BrokerError> {
        let now = self.clock.now();
        self.with_locked_job(id, token, |job| job.mark_completed(now, return_value))
    }

    async fn fail(&self, id: JobId, token: Uuid, error: String) -> Result<JobStatus, BrokerError> {
        let now = self.clock.now();
        self.with_locked_job(id, token, |job| {
            job.mark_failed(error, now);
            job.status.clone()
        })
    }

    async fn extend_lock(&self, id: JobId, token: Uuid) -> Result<(), BrokerError> {
        let now = self.clock.now();
        let timeout = self.visibility_timeout;
        self.with_locked_job(id, token, |job| job.extend_lock(now, timeout))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, BrokerError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let now = self.clock.now();
        Ok(jobs
            .get(&id)
            .filter(|job| !self.retention.is_expired(job, now))
            .cloned())
    }

    async fn purge_expired(&self) -> Result<usize, BrokerError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let now = self.clock.now();
        let before = jobs.len();
        jobs.retain(|_, job| !self.retention.is_expired(job, now));
        Ok(before - jobs.len())
    }

    async fn stats(&self, queue: &str) -> Result<JobStats, BrokerError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let now = self.clock.now();
        let mut stats = JobStats::default();
        for job in jobs
            .values()
            .filter(|j| j.queue == queue && !self.retention.is_expired(j, now))
        {
            stats.count(&job.status);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::clock::ManualClock;
    use chrono::Utc;
    use serde_json::json;

    fn broker_with_clock() -> (InMemoryBroker, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let broker = InMemoryBroker::new().with_clock(Arc::new(clock.clone()));
        (broker, clock)
    }

    fn ads_job() -> NewJob {
        NewJob::new(JobKind::AdsPush, json!({ "adsId": "AD1" }))
    }

    #[tokio::test]
    async fn claim_locks_job_against_second_worker() {
        let (broker, _clock) = broker_with_clock();
        let id = broker.enqueue(ads_job()).await.unwrap();

        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        assert_eq!(claimed.job.id, id);
        assert_eq!(claimed.job.attempt, 1);

        assert!(broker.claim("ads-push").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let (broker, _clock) = broker_with_clock();
        broker.enqueue(ads_job()).await.unwrap();

        assert!(broker.claim("article-push").await.unwrap().is_none());
        assert!(broker.claim("ads-push").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lock_redelivers_and_old_token_is_lost() {
        let (broker, clock) = broker_with_clock();
        let id = broker.enqueue(ads_job()).await.unwrap();
        let first = broker.claim("ads-push").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(31));
        let second = broker.claim("ads-push").await.unwrap().unwrap();
        assert_eq!(second.job.id, id);
        assert_eq!(second.job.attempt, 2);

        let err = broker.complete(id, first.token, None).await.unwrap_err();
        assert!(matches!(err, BrokerError::LockLost(_)));

        broker.complete(id, second.token, None).await.unwrap();
        assert_eq!(broker.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn extend_lock_keeps_job_invisible() {
        let (broker, clock) = broker_with_clock();
        let id = broker.enqueue(ads_job()).await.unwrap();
        let claimed = broker.claim("ads-push").await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(20));
        broker.extend_lock(id, claimed.token).await.unwrap();
        clock.advance(chrono::Duration::seconds(20));

        assert!(broker.claim("ads-push").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_attempt_is_delayed_then_retried() {
        let (broker, clock) = broker_with_clock();
        let job = ads_job().with_retry_policy(RetryPolicy::fixed(2, Duration::from_secs(10)));
        let id = broker.enqueue(job).await.unwrap();

        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        let status = broker.fail(id, claimed.token, "boom".into()).await.unwrap();
        assert!(matches!(status, JobStatus::Delayed { attempt: 1, .. }));
        assert!(broker.claim("ads-push").await.unwrap().is_none());

        clock.advance(chrono::Duration::seconds(10));
        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        let status = broker.fail(id, claimed.token, "boom".into()).await.unwrap();
        assert!(matches!(status, JobStatus::Failed { attempts: 2, .. }));
        assert!(broker.claim("ads-push").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completed_job_disappears_after_one_hour() {
        let (broker, clock) = broker_with_clock();
        let id = broker.enqueue(ads_job()).await.unwrap();
        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        broker.complete(id, claimed.token, Some(json!({"ok": true}))).await.unwrap();

        clock.advance(chrono::Duration::minutes(59));
        assert!(broker.get(id).await.unwrap().is_some());

        clock.advance(chrono::Duration::minutes(1));
        assert!(broker.get(id).await.unwrap().is_none());
        assert_eq!(broker.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_job_stays_observable_for_a_day() {
        let (broker, clock) = broker_with_clock();
        let id = broker
            .enqueue(ads_job().with_retry_policy(RetryPolicy::no_retry()))
            .await
            .unwrap();
        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        broker.fail(id, claimed.token, "tenant down".into()).await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        let job = broker.get(id).await.unwrap().unwrap();
        assert!(matches!(job.status, JobStatus::Failed { .. }));
        assert_eq!(broker.purge_expired().await.unwrap(), 0);

        clock.advance(chrono::Duration::hours(1));
        assert!(broker.get(id).await.unwrap().is_none());
        assert_eq!(broker.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let (broker, _clock) = broker_with_clock();
        broker.enqueue(ads_job()).await.unwrap();
        broker.enqueue(ads_job()).await.unwrap();
        broker.enqueue(NewJob::new(JobKind::Notification, json!({}))).await.unwrap();

        let claimed = broker.claim("ads-push").await.unwrap().unwrap();
        broker.complete(claimed.job.id, claimed.token, None).await.unwrap();

        let stats = broker.stats("ads-push").await.unwrap();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total(), 2);
    }
}
