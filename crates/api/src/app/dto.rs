use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pushdeck_core::CategoryId;
use pushdeck_infra::jobs::{EmailData, Job, JobId, JobStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushArticleRequest {
    pub category_id: CategoryId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    #[serde(default)]
    pub email_data: Option<EmailData>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: JobId,
}

/// Delivery observability for one job. The payload is not echoed back.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: JobId,
    pub queue: String,
    pub kind: &'static str,
    pub status: &'static str,
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let error = match &job.status {
            JobStatus::Delayed { error, .. } | JobStatus::Failed { error, .. } => {
                Some(error.clone())
            }
            _ => None,
        };
        Self {
            id: job.id,
            queue: job.queue,
            kind: job.kind.as_str(),
            status: job.status.name(),
            attempt: job.attempt,
            max_attempts: job.retry_policy.max_attempts,
            error,
            return_value: job.return_value,
            created_at: job.created_at,
            updated_at: job.updated_at,
            scheduled_at: job.scheduled_at,
            finished_at: job.finished_at,
        }
    }
}
