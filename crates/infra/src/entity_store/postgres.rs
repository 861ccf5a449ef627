//! Postgres-backed entity store.
//!
//! Reads the CMS tables and writes `content` and `website_articles` rows.
//! Also serves website-admin grants to the access guard.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Storage` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use pushdeck_auth::{GrantLookupError, GrantStore};
use pushdeck_core::{
    AdminId, Ads, AdsId, Article, ArticleId, CategoryId, Content, ContentId, Website,
    WebsiteAdmin, WebsiteArticle, WebsiteId,
};

use super::r#trait::{EntityStore, StoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS websites (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        domain TEXT NOT NULL,
        backend_url TEXT NOT NULL,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admins (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        role TEXT NOT NULL,
        is_verified BOOLEAN NOT NULL DEFAULT FALSE,
        is_deleted BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS website_admins (
        website_id TEXT NOT NULL REFERENCES websites(id),
        admin_id TEXT NOT NULL REFERENCES admins(id),
        PRIMARY KEY (website_id, admin_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS articles (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        body TEXT NOT NULL DEFAULT '',
        category_id TEXT,
        published_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS website_articles (
        website_id TEXT NOT NULL REFERENCES websites(id),
        article_id TEXT NOT NULL REFERENCES articles(id),
        category_id TEXT,
        pushed_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (website_id, article_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ads (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        image_url TEXT NOT NULL,
        target_url TEXT NOT NULL,
        start_date TIMESTAMPTZ NOT NULL,
        end_date TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        position TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content (
        id TEXT PRIMARY KEY,
        data JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self, content), fields(content_id = %content.id), err)]
    async fn insert_content(&self, content: &Content) -> Result<bool, StoreError> {
        let data = serde_json::to_value(content)
            .map_err(|e| StoreError::Storage(format!("failed to serialize content: {e}")))?;

        let result = sqlx::query(
            r#"
            INSERT INTO content (id, data)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(content.id.as_str())
        .bind(data)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_content", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn content(&self, id: &ContentId) -> Result<Option<Content>, StoreError> {
        let row = sqlx::query("SELECT data FROM content WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("content", e))?;

        row.map(|row| {
            let data: serde_json::Value = row
                .try_get("data")
                .map_err(|e| StoreError::Corrupt(format!("content row: {e}")))?;
            serde_json::from_value(data).map_err(|e| StoreError::Corrupt(format!("content row: {e}")))
        })
        .transpose()
    }

    async fn website(&self, id: &WebsiteId) -> Result<Option<Website>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, domain, backend_url, is_deleted FROM websites WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("website", e))?;

        row.map(|row| decode::<WebsiteRow>(&row).map(Website::from))
            .transpose()
    }

    async fn article(&self, id: &ArticleId) -> Result<Option<Article>, StoreError> {
        let row = sqlx::query(
            "SELECT id, title, body, category_id, published_at FROM articles WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("article", e))?;

        row.map(|row| decode::<ArticleRow>(&row).map(Article::from))
            .transpose()
    }

    async fn ads(&self, id: &AdsId) -> Result<Option<Ads>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, image_url, target_url, start_date, end_date, status, position
            FROM ads
            WHERE id = $1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ads", e))?;

        row.map(|row| decode::<AdsRow>(&row)?.try_into())
            .transpose()
    }

    #[instrument(
        skip(self, link),
        fields(website_id = %link.website_id, article_id = %link.article_id),
        err
    )]
    async fn record_website_article(&self, link: &WebsiteArticle) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO website_articles (website_id, article_id, category_id, pushed_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (website_id, article_id)
            DO UPDATE SET category_id = EXCLUDED.category_id, pushed_at = EXCLUDED.pushed_at
            "#,
        )
        .bind(link.website_id.as_str())
        .bind(link.article_id.as_str())
        .bind(link.category_id.as_ref().map(|c| c.as_str().to_string()))
        .bind(link.pushed_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_website_article", e))?;
        Ok(())
    }

    async fn remove_website_article(
        &self,
        website_id: &WebsiteId,
        article_id: &ArticleId,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("DELETE FROM website_articles WHERE website_id = $1 AND article_id = $2")
                .bind(website_id.as_str())
                .bind(article_id.as_str())
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("remove_website_article", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn article_websites(&self, article_id: &ArticleId) -> Result<Vec<Website>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT w.id, w.name, w.domain, w.backend_url, w.is_deleted
            FROM website_articles wa
            JOIN websites w ON w.id = wa.website_id
            WHERE wa.article_id = $1
            ORDER BY w.id ASC
            "#,
        )
        .bind(article_id.as_str())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("article_websites", e))?;

        rows.iter()
            .map(|row| decode::<WebsiteRow>(row).map(Website::from))
            .collect()
    }
}

#[async_trait]
impl GrantStore for PostgresEntityStore {
    async fn find_grant(
        &self,
        website_id: &WebsiteId,
        admin_id: &AdminId,
    ) -> Result<Option<WebsiteAdmin>, GrantLookupError> {
        let row = sqlx::query(
            "SELECT website_id, admin_id FROM website_admins WHERE website_id = $1 AND admin_id = $2",
        )
        .bind(website_id.as_str())
        .bind(admin_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| GrantLookupError(map_sqlx_error("find_grant", e).to_string()))?;

        row.map(|row| {
            let website_id: String = row.try_get("website_id")?;
            let admin_id: String = row.try_get("admin_id")?;
            Ok::<_, sqlx::Error>(WebsiteAdmin::new(
                WebsiteId::new(website_id),
                AdminId::new(admin_id),
            ))
        })
        .transpose()
        .map_err(|e| GrantLookupError(format!("corrupt grant row: {e}")))
    }
}

fn decode<'r, T: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<T, StoreError> {
    T::from_row(row).map_err(|e| StoreError::Corrupt(e.to_string()))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Unavailable(format!("{operation}: {err}"))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct WebsiteRow {
    id: String,
    name: String,
    domain: String,
    backend_url: String,
    is_deleted: bool,
}

impl<'r> FromRow<'r, PgRow> for WebsiteRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WebsiteRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            domain: row.try_get("domain")?,
            backend_url: row.try_get("backend_url")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }
}

impl From<WebsiteRow> for Website {
    fn from(row: WebsiteRow) -> Self {
        Website {
            id: WebsiteId::new(row.id),
            name: row.name,
            domain: row.domain,
            backend_url: row.backend_url,
            is_deleted: row.is_deleted,
        }
    }
}

#[derive(Debug)]
struct ArticleRow {
    id: String,
    title: String,
    body: String,
    category_id: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for ArticleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ArticleRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            category_id: row.try_get("category_id")?,
            published_at: row.try_get("published_at")?,
        })
    }
}

impl From<ArticleRow> for Article {
    fn from(row: ArticleRow) -> Self {
        Article {
            id: ArticleId::new(row.id),
            title: row.title,
            body: row.body,
            category_id: row.category_id.map(CategoryId::new),
            published_at: row.published_at,
        }
    }
}

#[derive(Debug)]
struct AdsRow {
    id: String,
    title: String,
    image_url: String,
    target_url: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    status: String,
    position: String,
}

impl<'r> FromRow<'r, PgRow> for AdsRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AdsRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            image_url: row.try_get("image_url")?,
            target_url: row.try_get("target_url")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status: row.try_get("status")?,
            position: row.try_get("position")?,
        })
    }
}

impl TryFrom<AdsRow> for Ads {
    type Error = StoreError;

    fn try_from(row: AdsRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("ads {}: {e}", row.id)))?;
        Ok(Ads {
            id: AdsId::new(row.id),
            title: row.title,
            image_url: row.image_url,
            target_url: row.target_url,
            start_date: row.start_date,
            end_date: row.end_date,
            status,
            position: row.position,
        })
    }
}
