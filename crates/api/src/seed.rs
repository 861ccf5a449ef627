//! Development fixture for the in-memory backends.
//!
//! With no database the API starts empty, so every guarded route would answer
//! 403/404. `DEV_SEED_FILE` points at a JSON document of this shape:
//!
//! ```json
//! {
//!   "websites": [{ "id": "W1", "name": "One", "domain": "one.example", "backendUrl": "http://localhost:4000" }],
//!   "articles": [{ "id": "A1", "title": "Hello" }],
//!   "ads": [],
//!   "grants": [{ "websiteId": "W1", "adminId": "admin-1" }]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use pushdeck_auth::InMemoryGrantStore;
use pushdeck_core::{Ads, Article, Website, WebsiteAdmin};
use pushdeck_infra::entity_store::InMemoryEntityStore;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DevSeed {
    pub websites: Vec<Website>,
    pub articles: Vec<Article>,
    pub ads: Vec<Ads>,
    pub grants: Vec<WebsiteAdmin>,
}

impl DevSeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid seed file {}", path.display()))
    }

    /// Upsert every record; grants already present are left as they are.
    pub fn apply(self, store: &InMemoryEntityStore, grants: &InMemoryGrantStore) {
        tracing::info!(
            websites = self.websites.len(),
            articles = self.articles.len(),
            ads = self.ads.len(),
            grants = self.grants.len(),
            "applying dev seed"
        );
        for website in self.websites {
            store.put_website(website);
        }
        for article in self.articles {
            store.put_article(article);
        }
        for ads in self.ads {
            store.put_ads(ads);
        }
        for grant in self.grants {
            grants.grant(grant.website_id, grant.admin_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushdeck_auth::check_website_access;
    use pushdeck_core::{AdminId, ArticleId, WebsiteId};
    use pushdeck_infra::entity_store::EntityStore;
    use serde_json::json;

    fn seed_json() -> serde_json::Value {
        json!({
            "websites": [{
                "id": "W1",
                "name": "One",
                "domain": "one.example",
                "backendUrl": "http://localhost:4000"
            }],
            "articles": [{ "id": "A1", "title": "Hello" }],
            "grants": [{ "websiteId": "W1", "adminId": "admin-1" }]
        })
    }

    #[tokio::test]
    async fn seeded_admin_passes_the_guard() {
        let store = InMemoryEntityStore::new();
        let grants = InMemoryGrantStore::new();
        let seed: DevSeed = serde_json::from_value(seed_json()).unwrap();
        seed.apply(&store, &grants);

        let website = WebsiteId::new("W1");
        assert!(check_website_access(&grants, &website, &AdminId::new("admin-1")).await.is_ok());
        assert!(check_website_access(&grants, &website, &AdminId::new("admin-2")).await.is_err());
        assert!(store.website(&website).await.unwrap().is_some());
        assert!(store.article(&ArticleId::new("A1")).await.unwrap().is_some());
    }

    #[test]
    fn load_reads_file_and_rejects_unknown_sections() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("pushdeck-seed-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&good, seed_json().to_string()).unwrap();
        let seed = DevSeed::load(&good).unwrap();
        assert_eq!(seed.websites.len(), 1);
        assert!(seed.ads.is_empty());

        let bad = dir.join(format!("pushdeck-seed-{}.json", uuid::Uuid::now_v7()));
        std::fs::write(&bad, r#"{ "admins": [] }"#).unwrap();
        assert!(DevSeed::load(&bad).is_err());

        std::fs::remove_file(good).unwrap();
        std::fs::remove_file(bad).unwrap();
    }
}
