//! Handlers, one per job kind.
//!
//! A handler error fails the attempt and the broker's retry policy takes over.
//! Tenant rejections (non-2xx) are not errors unless the handler was built
//! with [`RejectionPolicy::Fail`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use pushdeck_core::{ArticleId, WebsiteArticle};

use crate::entity_store::{EntityStore, StoreError};
use crate::mail::{MailError, Mailer};
use crate::push::{PushEndpoint, PushGateway, PushMethod, PushOutcome, PushRequest};

use super::payload::{AdsPushJob, ArticlePushJob, JobPayload, PushArticle, WebsiteTarget};
use super::types::{Job, JobKind};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Stored payload does not decode for its kind.
    #[error("malformed payload: {0}")]
    Payload(String),
    #[error("{0}")]
    NotFound(String),
    /// No HTTP response from the tenant; transient.
    #[error("tenant unreachable: {0}")]
    Transport(String),
    /// Tenant answered non-2xx and the handler escalates rejections.
    #[error("tenant rejected push with status {status}: {body}")]
    Rejected { status: u16, body: Value },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Mail(#[from] MailError),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// What a push handler does with a tenant's non-2xx answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Complete the job; the rejection is logged and kept in the return value.
    #[default]
    Complete,
    /// Fail the attempt so retries and alerting apply.
    Fail,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one attempt. `Ok` carries the job's return value.
    async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError>;
}

fn decode(job: &Job) -> Result<JobPayload, HandlerError> {
    JobPayload::from_value(job.kind, job.payload.clone())
        .map_err(|e| HandlerError::Payload(e.to_string()))
}

fn outcome_value(outcome: &PushOutcome) -> Value {
    json!({
        "delivered": outcome.is_delivered(),
        "status": outcome.status(),
        "body": outcome.body(),
    })
}

/// Map a single push outcome onto the attempt's result.
fn settle(outcome: PushOutcome, rejection: RejectionPolicy) -> Result<Value, HandlerError> {
    match outcome {
        PushOutcome::Unreachable { message } => Err(HandlerError::Transport(message)),
        PushOutcome::Rejected { status, body } if rejection == RejectionPolicy::Fail => {
            Err(HandlerError::Rejected { status, body })
        }
        other => Ok(outcome_value(&other)),
    }
}

/// Persists `insertContent` locally. Redelivery is a no-op.
pub struct ContentInsertHandler {
    store: Arc<dyn EntityStore>,
}

impl ContentInsertHandler {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobHandler for ContentInsertHandler {
    async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
        let JobPayload::ContentInsert(payload) = decode(job)? else {
            return Err(HandlerError::Payload("expected content insert payload".into()));
        };
        let content = payload.insert_content;
        let inserted = self.store.insert_content(&content).await?;
        if !inserted {
            debug!(content_id = %content.id, "content already present; skipping insert");
        }
        Ok(Some(json!({ "contentId": content.id, "inserted": inserted })))
    }
}

/// Publishes or removes an article, branching on the payload variant.
pub struct ArticlePushHandler {
    store: Arc<dyn EntityStore>,
    gateway: PushGateway,
    rejection: RejectionPolicy,
}

impl ArticlePushHandler {
    pub fn new(store: Arc<dyn EntityStore>, gateway: PushGateway) -> Self {
        Self {
            store,
            gateway,
            rejection: RejectionPolicy::default(),
        }
    }

    pub fn with_rejection_policy(mut self, rejection: RejectionPolicy) -> Self {
        self.rejection = rejection;
        self
    }

    async fn publish(&self, push: PushArticle) -> Result<Value, HandlerError> {
        let article = self
            .store
            .article(&push.article_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound(format!("article {} not found", push.article_id)))?;

        let mut body = serde_json::to_value(&article)
            .map_err(|e| HandlerError::Payload(e.to_string()))?;
        body["categoryId"] = json!(push.category_id);

        let request = PushRequest::new(
            push.website.backend_url.as_str(),
            PushEndpoint::Articles,
            PushMethod::Post,
        )
        .with_body(body);
        let outcome = self.gateway.push_to_website(&request).await;

        if outcome.is_delivered() {
            self.store
                .record_website_article(&WebsiteArticle {
                    website_id: push.website.id.clone(),
                    article_id: push.article_id.clone(),
                    category_id: Some(push.category_id.clone()),
                    pushed_at: Utc::now(),
                })
                .await?;
            info!(website_id = %push.website.id, article_id = %push.article_id, "article published");
        } else if let PushOutcome::Rejected { status, .. } = &outcome {
            warn!(
                website_id = %push.website.id,
                article_id = %push.article_id,
                status,
                "tenant rejected article publish"
            );
        }

        settle(outcome, self.rejection)
    }

    async fn remove(
        &self,
        article_id: ArticleId,
        website: WebsiteTarget,
    ) -> Result<Value, HandlerError> {
        let path = format!(
            "{}/{}",
            PushEndpoint::Articles.default_path(),
            article_id.as_str()
        );
        let request = PushRequest::new(
            website.backend_url.as_str(),
            PushEndpoint::Articles,
            PushMethod::Delete,
        )
        .with_path(path.as_str());
        let outcome = self.gateway.push_to_website(&request).await;

        match &outcome {
            // Keep the link so a retry still finds it.
            PushOutcome::Unreachable { .. } => {}
            PushOutcome::Rejected { status, .. } => {
                warn!(website_id = %website.id, %article_id, status, "tenant rejected article removal");
                self.store.remove_website_article(&website.id, &article_id).await?;
            }
            PushOutcome::Delivered { .. } => {
                if !self.store.remove_website_article(&website.id, &article_id).await? {
                    debug!(website_id = %website.id, %article_id, "no link row to drop");
                }
                info!(website_id = %website.id, %article_id, "article removed");
            }
        }

        let mut value = settle(outcome, self.rejection)?;
        value["articleId"] = json!(article_id);
        value["websiteId"] = json!(website.id);
        Ok(value)
    }
}

#[async_trait]
impl JobHandler for ArticlePushHandler {
    async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
        let JobPayload::ArticlePush(payload) = decode(job)? else {
            return Err(HandlerError::Payload("expected article payload".into()));
        };
        let value = match payload {
            ArticlePushJob::Publish(push) => self.publish(push).await?,
            ArticlePushJob::Remove {
                article_id,
                website,
            } => self.remove(article_id, website).await?,
        };
        Ok(Some(value))
    }
}

/// Creates or updates an ad on the snapshotted website.
pub struct AdsPushHandler {
    store: Arc<dyn EntityStore>,
    gateway: PushGateway,
    rejection: RejectionPolicy,
}

impl AdsPushHandler {
    pub fn new(store: Arc<dyn EntityStore>, gateway: PushGateway) -> Self {
        Self {
            store,
            gateway,
            rejection: RejectionPolicy::default(),
        }
    }

    pub fn with_rejection_policy(mut self, rejection: RejectionPolicy) -> Self {
        self.rejection = rejection;
        self
    }
}

#[async_trait]
impl JobHandler for AdsPushHandler {
    async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
        let JobPayload::AdsPush(AdsPushJob { ads_id, website }) = decode(job)? else {
            return Err(HandlerError::Payload("expected ads payload".into()));
        };
        let ads = self
            .store
            .ads(&ads_id)
            .await?
            .ok_or_else(|| HandlerError::NotFound(format!("ads {ads_id} not found")))?;

        let body = serde_json::to_value(&ads).map_err(|e| HandlerError::Payload(e.to_string()))?;
        let request = PushRequest::new(website.backend_url.as_str(), PushEndpoint::Ads, PushMethod::Post)
            .with_body(body);
        let outcome = self.gateway.push_to_website(&request).await;

        match &outcome {
            PushOutcome::Delivered { .. } => {
                info!(website_id = %website.id, %ads_id, "ads pushed");
            }
            PushOutcome::Rejected { status, .. } => {
                warn!(website_id = %website.id, %ads_id, status, "tenant rejected ads push");
            }
            PushOutcome::Unreachable { .. } => {}
        }

        settle(outcome, self.rejection).map(Some)
    }
}

/// Hands `emailData` to the mailer; an absent payload is a no-op.
pub struct NotificationHandler {
    mailer: Arc<dyn Mailer>,
}

impl NotificationHandler {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }
}

#[async_trait]
impl JobHandler for NotificationHandler {
    async fn handle(&self, job: &Job) -> Result<Option<Value>, HandlerError> {
        let JobPayload::Notification(payload) = decode(job)? else {
            return Err(HandlerError::Payload("expected notification payload".into()));
        };
        let Some(email) = payload.email_data else {
            debug!(job_id = %job.id, "notification without emailData; nothing to send");
            return Ok(None);
        };
        self.mailer.send(&email).await?;
        Ok(Some(json!({ "sent": true, "to": email.to })))
    }
}

/// Dependencies shared by the four pipeline handlers.
#[derive(Clone)]
pub struct PipelineHandlers {
    pub store: Arc<dyn EntityStore>,
    pub gateway: PushGateway,
    pub mailer: Arc<dyn Mailer>,
    pub rejection: RejectionPolicy,
}

impl PipelineHandlers {
    /// Handler for every job kind, keyed by queue name.
    pub fn into_handlers(self) -> Vec<(&'static str, Arc<dyn JobHandler>)> {
        JobKind::ALL
            .into_iter()
            .map(|kind| {
                let handler: Arc<dyn JobHandler> = match kind {
                    JobKind::ContentInsert => Arc::new(ContentInsertHandler::new(self.store.clone())),
                    JobKind::ArticlePush => Arc::new(
                        ArticlePushHandler::new(self.store.clone(), self.gateway.clone())
                            .with_rejection_policy(self.rejection),
                    ),
                    JobKind::AdsPush => Arc::new(
                        AdsPushHandler::new(self.store.clone(), self.gateway.clone())
                            .with_rejection_policy(self.rejection),
                    ),
                    JobKind::Notification => Arc::new(NotificationHandler::new(self.mailer.clone())),
                };
                (kind.queue_name(), handler)
            })
            .collect()
    }
}

