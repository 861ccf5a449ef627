use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use pushdeck_core::{
    Ads, AdsId, Article, ArticleId, Content, ContentId, Website, WebsiteArticle, WebsiteId,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into its entity.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Keyed insert/select over the entities the pipeline touches.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a content row keyed by its id.
    ///
    /// Idempotent: inserting an id that already exists leaves the stored row
    /// untouched and returns `Ok(false)`.
    async fn insert_content(&self, content: &Content) -> Result<bool, StoreError>;

    async fn content(&self, id: &ContentId) -> Result<Option<Content>, StoreError>;

    async fn website(&self, id: &WebsiteId) -> Result<Option<Website>, StoreError>;

    async fn article(&self, id: &ArticleId) -> Result<Option<Article>, StoreError>;

    async fn ads(&self, id: &AdsId) -> Result<Option<Ads>, StoreError>;

    /// Record that an article has been pushed to a website (upsert).
    async fn record_website_article(&self, link: &WebsiteArticle) -> Result<(), StoreError>;

    /// Drop a website/article link. Returns `false` when there was none.
    async fn remove_website_article(
        &self,
        website_id: &WebsiteId,
        article_id: &ArticleId,
    ) -> Result<bool, StoreError>;

    /// Websites the article is currently linked to.
    async fn article_websites(&self, article_id: &ArticleId) -> Result<Vec<Website>, StoreError>;
}

#[async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    async fn insert_content(&self, content: &Content) -> Result<bool, StoreError> {
        (**self).insert_content(content).await
    }

    async fn content(&self, id: &ContentId) -> Result<Option<Content>, StoreError> {
        (**self).content(id).await
    }

    async fn website(&self, id: &WebsiteId) -> Result<Option<Website>, StoreError> {
        (**self).website(id).await
    }

    async fn article(&self, id: &ArticleId) -> Result<Option<Article>, StoreError> {
        (**self).article(id).await
    }

    async fn ads(&self, id: &AdsId) -> Result<Option<Ads>, StoreError> {
        (**self).ads(id).await
    }

    async fn record_website_article(&self, link: &WebsiteArticle) -> Result<(), StoreError> {
        (**self).record_website_article(link).await
    }

    async fn remove_website_article(
        &self,
        website_id: &WebsiteId,
        article_id: &ArticleId,
    ) -> Result<bool, StoreError> {
        (**self).remove_website_article(website_id, article_id).await
    }

    async fn article_websites(&self, article_id: &ArticleId) -> Result<Vec<Website>, StoreError> {
        (**self).article_websites(article_id).await
    }
}
