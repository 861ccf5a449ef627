//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Job kind. Each kind has its own named queue and handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ContentInsert,
    ArticlePush,
    AdsPush,
    Notification,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ContentInsert,
        JobKind::ArticlePush,
        JobKind::AdsPush,
        JobKind::Notification,
    ];

    /// Name of the queue jobs of this kind are enqueued on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::ContentInsert => "content-insert",
            JobKind::ArticlePush => "article-push",
            JobKind::AdsPush => "ads-push",
            JobKind::Notification => "notification",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ContentInsert => "content_insert",
            JobKind::ArticlePush => "article_push",
            JobKind::AdsPush => "ads_push",
            JobKind::Notification => "notification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

/// Job execution status.
///
/// `Queued → Active → Completed | Failed`, with `Delayed` in between
/// attempts while a retry backoff is pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Queued,
    /// Claimed by a worker and locked
    Active,
    /// Failed, will be retried once `scheduled_at` passes
    Delayed { error: String, attempt: u32 },
    /// Handler returned successfully
    Completed,
    /// Exhausted retries
    Failed { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Delayed { .. } => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^attempt
    #[default]
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Backoff strategy
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A single attempt; the first failure is final.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }

    /// Calculate delay for a given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
            BackoffStrategy::Linear => (base_ms * attempt as f64).min(max_ms),
        };

        // Deterministic jitter derived from the attempt number
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A background job as held by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Named queue the job lives on
    pub queue: String,
    pub kind: JobKind,
    /// Wire payload, exactly as produced
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    /// Number of attempts started so far
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not claimable before this instant (retry backoff)
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Start of the current or last attempt
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
    /// Visibility lock expiry while `Active`
    pub locked_until: Option<DateTime<Utc>>,
    /// Token of the current lock holder
    pub lock_token: Option<Uuid>,
    /// Handler return value of the completed attempt
    pub return_value: Option<serde_json::Value>,
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            queue: kind.queue_name().to_string(),
            kind,
            payload,
            status: JobStatus::Queued,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            locked_until: None,
            lock_token: None,
            return_value: None,
            history: Vec::new(),
        }
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the queue (defaults to the kind's queue).
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Whether a worker may claim this job at `now`.
    ///
    /// An `Active` job becomes claimable again once its lock expires; that is
    /// the at-least-once redelivery path for crashed workers.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued | JobStatus::Delayed { .. } => {
                self.scheduled_at.map_or(true, |at| now >= at)
            }
            JobStatus::Active => self.locked_until.is_some_and(|until| now >= until),
            JobStatus::Completed | JobStatus::Failed { .. } => false,
        }
    }

    /// Whether `token` is the live lock on this job.
    pub fn holds_lock(&self, token: Uuid) -> bool {
        matches!(self.status, JobStatus::Active) && self.lock_token == Some(token)
    }

    /// Mark job as active under a fresh lock.
    pub fn mark_active(&mut self, now: DateTime<Utc>, visibility_timeout: Duration) -> Uuid {
        let token = Uuid::now_v7();
        self.status = JobStatus::Active;
        self.attempt += 1;
        self.updated_at = now;
        self.scheduled_at = None;
        self.started_at = Some(now);
        self.locked_until = Some(now + to_chrono(visibility_timeout));
        self.lock_token = Some(token);
        token
    }

    /// Push the lock expiry forward while a handler is still running.
    pub fn extend_lock(&mut self, now: DateTime<Utc>, visibility_timeout: Duration) {
        self.locked_until = Some(now + to_chrono(visibility_timeout));
        self.updated_at = now;
    }

    /// Mark job as completed.
    pub fn mark_completed(&mut self, now: DateTime<Utc>, return_value: Option<serde_json::Value>) {
        let started_at = self.started_at.unwrap_or(now);
        self.status = JobStatus::Completed;
        self.updated_at = now;
        self.finished_at = Some(now);
        self.release_lock();
        self.return_value = return_value;
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: true,
            error: None,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }

    /// Mark job as failed; schedules a retry when the policy allows one.
    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        self.updated_at = now;
        self.release_lock();
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at: now,
            success: false,
            error: Some(error.clone()),
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt);
            self.scheduled_at = Some(now + to_chrono(delay));
            self.status = JobStatus::Delayed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.finished_at = Some(now);
            self.status = JobStatus::Failed {
                error,
                attempts: self.attempt,
            };
        }
    }

    fn release_lock(&mut self) {
        self.locked_until = None;
        self.lock_token = None;
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn kind_round_trips_through_its_name() {
        for kind in JobKind::ALL {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("nope"), None);
    }

    #[test]
    fn job_lifecycle() {
        let now = Utc::now();
        let mut job = Job::new(JobKind::AdsPush, json!({}), now);
        assert_eq!(job.queue, "ads-push");
        assert!(job.is_claimable(now));

        let token = job.mark_active(now, Duration::from_secs(30));
        assert!(job.holds_lock(token));
        assert_eq!(job.attempt, 1);
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(31)));

        job.mark_completed(now, Some(json!({"ok": true})));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.holds_lock(token));
        assert_eq!(job.finished_at, Some(now));
        assert!(job.history[0].success);
    }

    #[test]
    fn job_failure_and_retry() {
        let now = Utc::now();
        let mut job = Job::new(JobKind::ArticlePush, json!({}), now).with_retry_policy(
            RetryPolicy::fixed(2, Duration::from_secs(5)),
        );

        job.mark_active(now, Duration::from_secs(30));
        job.mark_failed("error 1".to_string(), now);

        assert!(matches!(job.status, JobStatus::Delayed { attempt: 1, .. }));
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + chrono::Duration::seconds(5)));
        assert!(job.finished_at.is_none());

        job.mark_active(now, Duration::from_secs(30));
        job.mark_failed("error 2".to_string(), now);

        assert!(matches!(job.status, JobStatus::Failed { attempts: 2, .. }));
        assert!(job.status.is_terminal());
        assert_eq!(job.finished_at, Some(now));
    }

    proptest::proptest! {
        #[test]
        fn failures_end_after_exactly_max_attempts(
            max_attempts in 1u32..8,
            base_ms in 0u64..5_000,
            strategy in proptest::prop_oneof![
                proptest::strategy::Just(BackoffStrategy::Fixed),
                proptest::strategy::Just(BackoffStrategy::Linear),
                proptest::strategy::Just(BackoffStrategy::Exponential),
            ],
        ) {
            let policy = RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(60),
                strategy,
                jitter: 0.1,
            };
            let cap = Duration::from_millis(66_000);
            let now = Utc::now();
            let mut job = Job::new(JobKind::AdsPush, json!({}), now).with_retry_policy(policy);

            for round in 1..=max_attempts {
                job.mark_active(now, Duration::from_secs(30));
                job.mark_failed(format!("round {round}"), now);
                if round < max_attempts {
                    let is_delayed = matches!(job.status, JobStatus::Delayed { attempt, .. } if attempt == round);
                    proptest::prop_assert!(is_delayed);
                    let wait = job.scheduled_at.unwrap() - now;
                    proptest::prop_assert!(wait <= to_chrono(cap));
                }
            }

            proptest::prop_assert_eq!(
                job.status.clone(),
                JobStatus::Failed { error: format!("round {max_attempts}"), attempts: max_attempts }
            );
            proptest::prop_assert_eq!(job.history.len() as u32, max_attempts);
        }
    }
}
