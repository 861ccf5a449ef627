use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use pushdeck_core::{
    Ads, AdsId, Article, ArticleId, Content, ContentId, Entity, Website, WebsiteArticle,
    WebsiteId,
};

use super::r#trait::{EntityStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    content: HashMap<ContentId, Content>,
    websites: HashMap<WebsiteId, Website>,
    articles: HashMap<ArticleId, Article>,
    ads: HashMap<AdsId, Ads>,
    website_articles: HashMap<(WebsiteId, ArticleId), WebsiteArticle>,
}

/// In-memory entity store.
///
/// Intended for tests/dev. The `put_*` methods stand in for the CRUD layer
/// that owns these records in a real deployment.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_website(&self, website: Website) {
        if let Ok(mut t) = self.tables.write() {
            upsert(&mut t.websites, website);
        }
    }

    pub fn put_article(&self, article: Article) {
        if let Ok(mut t) = self.tables.write() {
            upsert(&mut t.articles, article);
        }
    }

    pub fn put_ads(&self, ads: Ads) {
        if let Ok(mut t) = self.tables.write() {
            upsert(&mut t.ads, ads);
        }
    }

    pub fn content_count(&self) -> usize {
        self.tables.read().map(|t| t.content.len()).unwrap_or(0)
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        self.tables
            .read()
            .map(|t| f(&t))
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T, StoreError> {
        self.tables
            .write()
            .map(|mut t| f(&mut t))
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

fn upsert<E: Entity>(table: &mut HashMap<E::Id, E>, entity: E) {
    table.insert(entity.id().clone(), entity);
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn insert_content(&self, content: &Content) -> Result<bool, StoreError> {
        self.write(|t| {
            if t.content.contains_key(content.id()) {
                false
            } else {
                upsert(&mut t.content, content.clone());
                true
            }
        })
    }

    async fn content(&self, id: &ContentId) -> Result<Option<Content>, StoreError> {
        self.read(|t| t.content.get(id).cloned())
    }

    async fn website(&self, id: &WebsiteId) -> Result<Option<Website>, StoreError> {
        self.read(|t| t.websites.get(id).cloned())
    }

    async fn article(&self, id: &ArticleId) -> Result<Option<Article>, StoreError> {
        self.read(|t| t.articles.get(id).cloned())
    }

    async fn ads(&self, id: &AdsId) -> Result<Option<Ads>, StoreError> {
        self.read(|t| t.ads.get(id).cloned())
    }

    async fn record_website_article(&self, link: &WebsiteArticle) -> Result<(), StoreError> {
        self.write(|t| {
            t.website_articles.insert(
                (link.website_id.clone(), link.article_id.clone()),
                link.clone(),
            );
        })
    }

    async fn remove_website_article(
        &self,
        website_id: &WebsiteId,
        article_id: &ArticleId,
    ) -> Result<bool, StoreError> {
        self.write(|t| {
            t.website_articles
                .remove(&(website_id.clone(), article_id.clone()))
                .is_some()
        })
    }

    async fn article_websites(&self, article_id: &ArticleId) -> Result<Vec<Website>, StoreError> {
        self.read(|t| {
            let mut websites: Vec<Website> = t
                .website_articles
                .keys()
                .filter(|(_, a)| a == article_id)
                .filter_map(|(w, _)| t.websites.get(w).cloned())
                .collect();
            websites.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
            websites
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn website(id: &str) -> Website {
        Website {
            id: WebsiteId::new(id),
            name: id.to_string(),
            domain: format!("{id}.example"),
            backend_url: format!("https://{id}.example"),
            is_deleted: false,
        }
    }

    #[tokio::test]
    async fn insert_content_is_idempotent() {
        let store = InMemoryEntityStore::new();
        let first = Content::new(ContentId::new("C1")).with_field("title", json!("one"));
        let replay = Content::new(ContentId::new("C1")).with_field("title", json!("two"));

        assert!(store.insert_content(&first).await.unwrap());
        assert!(!store.insert_content(&replay).await.unwrap());

        assert_eq!(store.content_count(), 1);
        let stored = store.content(&ContentId::new("C1")).await.unwrap().unwrap();
        assert_eq!(stored.fields["title"], json!("one"));
    }

    #[tokio::test]
    async fn article_links_resolve_to_websites() {
        let store = InMemoryEntityStore::new();
        store.put_website(website("w1"));
        store.put_website(website("w2"));
        let article = ArticleId::new("A1");

        for w in ["w2", "w1"] {
            store
                .record_website_article(&WebsiteArticle {
                    website_id: WebsiteId::new(w),
                    article_id: article.clone(),
                    category_id: None,
                    pushed_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let linked = store.article_websites(&article).await.unwrap();
        let ids: Vec<_> = linked.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, ["w1", "w2"]);

        assert!(store
            .remove_website_article(&WebsiteId::new("w1"), &article)
            .await
            .unwrap());
        assert!(!store
            .remove_website_article(&WebsiteId::new("w1"), &article)
            .await
            .unwrap());
        assert_eq!(store.article_websites(&article).await.unwrap().len(), 1);
    }
}
