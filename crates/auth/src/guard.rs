//! Website access guard.
//!
//! Every control-plane action that leads to a job touching per-website content
//! must pass [`check_website_access`] first. The returned [`WebsiteAccess`]
//! can only be produced here, and the job producer's per-website operations
//! take it as an argument, so an unauthorized request never reaches the queue.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use pushdeck_core::{AdminId, WebsiteAdmin, WebsiteId};

use crate::grants::{GrantLookupError, GrantStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// No grant row exists for the pair. Authoritative; never retried.
    #[error("permission denied: admin '{admin_id}' has no access to website '{website_id}'")]
    PermissionDenied {
        website_id: WebsiteId,
        admin_id: AdminId,
    },

    #[error(transparent)]
    Lookup(#[from] GrantLookupError),
}

/// Proof that an admin holds a grant for a website.
///
/// Serializes as `{ "access": true, "data": <grant row> }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebsiteAccess {
    access: bool,
    data: WebsiteAdmin,
}

impl WebsiteAccess {
    pub fn access(&self) -> bool {
        self.access
    }

    /// The grant row that authorized the request.
    pub fn grant(&self) -> &WebsiteAdmin {
        &self.data
    }

    pub fn website_id(&self) -> &WebsiteId {
        &self.data.website_id
    }

    pub fn admin_id(&self) -> &AdminId {
        &self.data.admin_id
    }
}

/// Check that `admin_id` holds a grant for `website_id`.
///
/// - Hit: `Ok(WebsiteAccess { access: true, data: grant })`
/// - Miss: `Err(AccessError::PermissionDenied)`, regardless of the admin's role
/// - Store failure: `Err(AccessError::Lookup)`
pub async fn check_website_access<G>(
    grants: &G,
    website_id: &WebsiteId,
    admin_id: &AdminId,
) -> Result<WebsiteAccess, AccessError>
where
    G: GrantStore + ?Sized,
{
    match grants.find_grant(website_id, admin_id).await? {
        // A store that returns a mismatched row is treated as a miss.
        Some(grant) if &grant.website_id == website_id && &grant.admin_id == admin_id => {
            debug!(website_id = %website_id, admin_id = %admin_id, "website access granted");
            Ok(WebsiteAccess {
                access: true,
                data: grant,
            })
        }
        _ => {
            warn!(website_id = %website_id, admin_id = %admin_id, "website access denied");
            Err(AccessError::PermissionDenied {
                website_id: website_id.clone(),
                admin_id: admin_id.clone(),
            })
        }
    }
}
