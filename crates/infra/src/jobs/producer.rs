//! Job Producer: one enqueue operation per job kind.
//!
//! Per-website operations take the guard's [`WebsiteAccess`] proof, so a job
//! touching a website cannot be produced without a passed access check.
//! Enqueue returns as soon as the broker accepts the job; broker failures come
//! back to the caller synchronously.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use pushdeck_auth::WebsiteAccess;
use pushdeck_core::{AdsId, ArticleId, CategoryId, Content, Website};

use crate::entity_store::{EntityStore, StoreError};

use super::payload::{
    AdsPushJob, ArticlePushJob, ContentInsertJob, EmailData, JobPayload, NotificationJob,
    PushArticle, WebsiteTarget,
};
use super::store::{Broker, BrokerError, NewJob};
use super::types::{JobId, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    /// Payload failed its shape checks; nothing was enqueued.
    #[error("invalid job payload: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

#[derive(Clone)]
pub struct JobProducer {
    broker: Arc<dyn Broker>,
    store: Arc<dyn EntityStore>,
    retry_policy: RetryPolicy,
}

impl JobProducer {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<dyn EntityStore>) -> Self {
        Self {
            broker,
            store,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    #[instrument(skip(self, content), fields(content_id = %content.id), err)]
    pub async fn enqueue_content_insert(&self, content: Content) -> Result<JobId, ProduceError> {
        self.enqueue(JobPayload::ContentInsert(ContentInsertJob {
            insert_content: content,
        }))
        .await
    }

    /// Publish (create/update) an article on the guarded website.
    ///
    /// The website's current `backendUrl` is copied into the job; delivery uses
    /// that snapshot even if the website record changes later.
    #[instrument(
        skip(self, access),
        fields(website_id = %access.website_id(), article_id = %article_id),
        err
    )]
    pub async fn enqueue_article_push(
        &self,
        access: &WebsiteAccess,
        article_id: ArticleId,
        category_id: CategoryId,
    ) -> Result<JobId, ProduceError> {
        let website = self.live_website(access).await?;
        if self.store.article(&article_id).await?.is_none() {
            return Err(ProduceError::NotFound(format!("article {article_id} not found")));
        }

        self.enqueue(JobPayload::ArticlePush(ArticlePushJob::Publish(PushArticle {
            article_id,
            website: snapshot(&website),
            category_id,
        })))
        .await
    }

    /// Remove an article from the one website `access` covers.
    ///
    /// The destination is snapshotted now; a missing link row only warns since
    /// the tenant may still hold a copy pushed before links were recorded.
    #[instrument(
        skip(self, access),
        fields(website_id = %access.website_id(), article_id = %article_id),
        err
    )]
    pub async fn enqueue_article_removal(
        &self,
        access: &WebsiteAccess,
        article_id: ArticleId,
    ) -> Result<JobId, ProduceError> {
        let website = self.live_website(access).await?;
        let linked = self
            .store
            .article_websites(&article_id)
            .await?
            .iter()
            .any(|linked| linked.id == website.id);
        if !linked {
            warn!(website_id = %website.id, %article_id, "removing article with no recorded link");
        }

        self.enqueue(JobPayload::ArticlePush(ArticlePushJob::Remove {
            article_id,
            website: snapshot(&website),
        }))
        .await
    }

    #[instrument(
        skip(self, access),
        fields(website_id = %access.website_id(), ads_id = %ads_id),
        err
    )]
    pub async fn enqueue_ads_push(
        &self,
        access: &WebsiteAccess,
        ads_id: AdsId,
    ) -> Result<JobId, ProduceError> {
        let website = self.live_website(access).await?;
        if self.store.ads(&ads_id).await?.is_none() {
            return Err(ProduceError::NotFound(format!("ads {ads_id} not found")));
        }

        self.enqueue(JobPayload::AdsPush(AdsPushJob {
            ads_id,
            website: snapshot(&website),
        }))
        .await
    }

    /// `None` produces a job the worker completes without sending anything.
    #[instrument(skip(self, email_data), fields(has_email = email_data.is_some()), err)]
    pub async fn enqueue_notification(
        &self,
        email_data: Option<EmailData>,
    ) -> Result<JobId, ProduceError> {
        self.enqueue(JobPayload::Notification(NotificationJob { email_data }))
            .await
    }

    async fn enqueue(&self, payload: JobPayload) -> Result<JobId, ProduceError> {
        payload.validate().map_err(ProduceError::Validation)?;
        let kind = payload.kind();
        let value = payload
            .to_value()
            .map_err(|e| ProduceError::Validation(e.to_string()))?;

        let job = NewJob::new(kind, value).with_retry_policy(self.retry_policy.clone());
        let id = self.broker.enqueue(job).await?;
        info!(job_id = %id, queue = kind.queue_name(), "job accepted");
        Ok(id)
    }

    async fn live_website(&self, access: &WebsiteAccess) -> Result<Website, ProduceError> {
        match self.store.website(access.website_id()).await? {
            Some(website) if !website.is_deleted => Ok(website),
            _ => Err(ProduceError::NotFound(format!(
                "website {} not found",
                access.website_id()
            ))),
        }
    }
}

fn snapshot(website: &Website) -> WebsiteTarget {
    WebsiteTarget {
        id: website.id.clone(),
        backend_url: website.backend_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::InMemoryEntityStore;
    use crate::jobs::store::{ClaimedJob, InMemoryBroker, JobStats};
    use crate::jobs::types::{Job, JobKind, JobStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use pushdeck_auth::{InMemoryGrantStore, check_website_access};
    use pushdeck_core::{AdminId, Ads, AdsStatus, Article, ContentId, WebsiteId};
    use serde_json::{Value, json};
    use uuid::Uuid;

    fn website(id: &str, url: &str) -> Website {
        Website {
            id: WebsiteId::new(id),
            name: id.into(),
            domain: format!("{id}.example"),
            backend_url: url.into(),
            is_deleted: false,
        }
    }

    async fn access(website: &str) -> WebsiteAccess {
        let grants = InMemoryGrantStore::new();
        grants.grant(WebsiteId::new(website), AdminId::new("admin"));
        check_website_access(&grants, &WebsiteId::new(website), &AdminId::new("admin"))
            .await
            .unwrap()
    }

    fn setup() -> (JobProducer, Arc<InMemoryBroker>, Arc<InMemoryEntityStore>) {
        let broker = InMemoryBroker::arc();
        let store = Arc::new(InMemoryEntityStore::new());
        store.put_website(website("W1", "https://site.example"));
        store.put_article(Article {
            id: ArticleId::new("A1"),
            title: "Hello".into(),
            body: String::new(),
            category_id: None,
            published_at: None,
        });
        store.put_ads(Ads {
            id: AdsId::new("AD1"),
            title: "Sale".into(),
            image_url: "https://cdn.example/a.png".into(),
            target_url: "https://shop.example".into(),
            start_date: Utc::now(),
            end_date: Utc::now(),
            status: AdsStatus::Active,
            position: "top".into(),
        });
        let producer = JobProducer::new(broker.clone(), store.clone());
        (producer, broker, store)
    }

    #[tokio::test]
    async fn article_push_snapshots_backend_url() {
        let (producer, broker, store) = setup();
        let id = producer
            .enqueue_article_push(&access("W1").await, ArticleId::new("A1"), CategoryId::new("C1"))
            .await
            .unwrap();

        // Changing the website afterwards does not touch the queued job.
        store.put_website(website("W1", "https://moved.example"));

        let job = broker.get(id).await.unwrap().unwrap();
        assert_eq!(job.kind, JobKind::ArticlePush);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(
            job.payload,
            json!({
                "pushArticle": {
                    "articleId": "A1",
                    "website": { "id": "W1", "backendUrl": "https://site.example" },
                    "categoryId": "C1"
                }
            })
        );
    }

    #[tokio::test]
    async fn removal_carries_only_the_article_id() {
        let (producer, broker, _store) = setup();
        let id = producer
            .enqueue_article_removal(&access("W1").await, ArticleId::new("A1"))
            .await
            .unwrap();

        let job = broker.get(id).await.unwrap().unwrap();
        assert_eq!(job.payload, json!({ "articleId": "A1" }));
    }

    #[tokio::test]
    async fn deleted_or_unknown_website_is_not_found() {
        let (producer, _broker, store) = setup();
        let mut deleted = website("W2", "https://w2.example");
        deleted.is_deleted = true;
        store.put_website(deleted);

        let err = producer
            .enqueue_ads_push(&access("W2").await, AdsId::new("AD1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProduceError::NotFound(_)));

        let err = producer
            .enqueue_ads_push(&access("W9").await, AdsId::new("AD1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProduceError::NotFound(_)));
    }

    #[tokio::test]
    async fn invalid_backend_url_never_reaches_the_broker() {
        let (producer, broker, store) = setup();
        store.put_website(website("W3", "ftp://w3.example"));

        let err = producer
            .enqueue_ads_push(&access("W3").await, AdsId::new("AD1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProduceError::Validation(_)));
        assert_eq!(broker.stats("ads-push").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn content_and_notification_jobs_use_their_queues() {
        let (producer, broker, _store) = setup();
        producer
            .enqueue_content_insert(Content::new(ContentId::new("C-1")))
            .await
            .unwrap();
        producer.enqueue_notification(None).await.unwrap();

        assert_eq!(broker.stats("content-insert").await.unwrap().queued, 1);
        assert_eq!(broker.stats("notification").await.unwrap().queued, 1);
    }

    struct DownBroker;

    #[async_trait]
    impl Broker for DownBroker {
        async fn enqueue(&self, _job: NewJob) -> Result<JobId, BrokerError> {
            Err(BrokerError::Unavailable("connection refused".into()))
        }
        async fn claim(&self, _queue: &str) -> Result<Option<ClaimedJob>, BrokerError> {
            Ok(None)
        }
        async fn complete(&self, id: JobId, _t: Uuid, _v: Option<Value>) -> Result<(), BrokerError> {
            Err(BrokerError::NotFound(id))
        }
        async fn fail(&self, id: JobId, _t: Uuid, _e: String) -> Result<JobStatus, BrokerError> {
            Err(BrokerError::NotFound(id))
        }
        async fn extend_lock(&self, id: JobId, _t: Uuid) -> Result<(), BrokerError> {
            Err(BrokerError::NotFound(id))
        }
        async fn get(&self, _id: JobId) -> Result<Option<Job>, BrokerError> {
            Ok(None)
        }
        async fn purge_expired(&self) -> Result<usize, BrokerError> {
            Ok(0)
        }
        async fn stats(&self, _queue: &str) -> Result<JobStats, BrokerError> {
            Ok(JobStats::default())
        }
    }

    #[tokio::test]
    async fn broker_outage_propagates_to_caller() {
        let producer = JobProducer::new(Arc::new(DownBroker), Arc::new(InMemoryEntityStore::new()));
        let err = producer.enqueue_notification(None).await.unwrap_err();
        assert!(matches!(err, ProduceError::Broker(BrokerError::Unavailable(_))));
    }
}
