//! `pushdeck-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the entity contracts shared with the entity store, and the
//! domain error type.

pub mod entity;
pub mod error;
pub mod id;
pub mod model;

pub use entity::Entity;
pub use error::DomainError;
pub use id::{AdminId, AdsId, ArticleId, CategoryId, ContentId, WebsiteId};
pub use model::{Admin, Ads, AdsStatus, Article, Content, Website, WebsiteAdmin, WebsiteArticle};
