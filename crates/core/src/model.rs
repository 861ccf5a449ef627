//! Entity contracts owned by the entity store.
//!
//! The pipeline only reads these records (to build job payloads) and writes
//! [`Content`] rows and [`WebsiteArticle`] links. Field names serialize in
//! camelCase because the same shapes are exchanged with tenant backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::{AdminId, AdsId, ArticleId, CategoryId, ContentId, WebsiteId};

/// An independently hosted tenant website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub id: WebsiteId,
    pub name: String,
    pub domain: String,
    /// Base URL of the tenant backend that receives pushes.
    pub backend_url: String,
    #[serde(default)]
    pub is_deleted: bool,
}

/// A control-plane administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: AdminId,
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Grant row: existence of the pair is the permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAdmin {
    pub website_id: WebsiteId,
    pub admin_id: AdminId,
}

impl WebsiteAdmin {
    pub fn new(website_id: WebsiteId, admin_id: AdminId) -> Self {
        Self {
            website_id,
            admin_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Join row recording that an article has been pushed to a website.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteArticle {
    pub website_id: WebsiteId,
    pub article_id: ArticleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<CategoryId>,
    pub pushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdsStatus {
    Draft,
    Active,
    Paused,
    Expired,
}

impl AdsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdsStatus::Draft => "draft",
            AdsStatus::Active => "active",
            AdsStatus::Paused => "paused",
            AdsStatus::Expired => "expired",
        }
    }
}

impl core::str::FromStr for AdsStatus {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(AdsStatus::Draft),
            "active" => Ok(AdsStatus::Active),
            "paused" => Ok(AdsStatus::Paused),
            "expired" => Ok(AdsStatus::Expired),
            other => Err(crate::DomainError::validation(format!("unknown ads status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ads {
    pub id: AdsId,
    pub title: String,
    pub image_url: String,
    pub target_url: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: AdsStatus,
    pub position: String,
}

/// An opaque content row, keyed by `id`.
///
/// Everything except the id is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: ContentId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Content {
    pub fn new(id: ContentId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}
