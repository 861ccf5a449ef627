//! Grant lookup contract and an in-memory implementation.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use pushdeck_core::{AdminId, WebsiteAdmin, WebsiteId};

/// The lookup itself failed; says nothing about whether a grant exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("grant lookup failed: {0}")]
pub struct GrantLookupError(pub String);

/// Source of `(website, admin)` grant rows.
///
/// Implemented by the entity store; the guard never infers a grant from
/// anything other than the row itself.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn find_grant(
        &self,
        website_id: &WebsiteId,
        admin_id: &AdminId,
    ) -> Result<Option<WebsiteAdmin>, GrantLookupError>;
}

#[async_trait]
impl<S> GrantStore for Arc<S>
where
    S: GrantStore + ?Sized,
{
    async fn find_grant(
        &self,
        website_id: &WebsiteId,
        admin_id: &AdminId,
    ) -> Result<Option<WebsiteAdmin>, GrantLookupError> {
        (**self).find_grant(website_id, admin_id).await
    }
}

/// In-memory grant table for tests/dev. Pairs are unique.
#[derive(Debug, Default)]
pub struct InMemoryGrantStore {
    grants: RwLock<HashSet<WebsiteAdmin>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a grant. Returns `false` if the pair already existed.
    pub fn grant(&self, website_id: WebsiteId, admin_id: AdminId) -> bool {
        self.grants
            .write()
            .map(|mut g| g.insert(WebsiteAdmin::new(website_id, admin_id)))
            .unwrap_or(false)
    }

    /// Remove a grant. Returns `false` if there was nothing to remove.
    pub fn revoke(&self, website_id: &WebsiteId, admin_id: &AdminId) -> bool {
        let key = WebsiteAdmin::new(website_id.clone(), admin_id.clone());
        self.grants
            .write()
            .map(|mut g| g.remove(&key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.grants.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn find_grant(
        &self,
        website_id: &WebsiteId,
        admin_id: &AdminId,
    ) -> Result<Option<WebsiteAdmin>, GrantLookupError> {
        let grants = self
            .grants
            .read()
            .map_err(|_| GrantLookupError("grant table lock poisoned".to_string()))?;
        let key = WebsiteAdmin::new(website_id.clone(), admin_id.clone());
        Ok(grants.get(&key).cloned())
    }
}
