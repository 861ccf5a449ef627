//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

macro_rules! impl_entity {
    ($t:ty, $id:ty) => {
        impl Entity for $t {
            type Id = $id;

            fn id(&self) -> &Self::Id {
                &self.id
            }
        }
    };
}

use crate::id::{AdminId, AdsId, ArticleId, ContentId, WebsiteId};
use crate::model::{Admin, Ads, Article, Content, Website};

impl_entity!(Website, WebsiteId);
impl_entity!(Admin, AdminId);
impl_entity!(Article, ArticleId);
impl_entity!(Ads, AdsId);
impl_entity!(Content, ContentId);
