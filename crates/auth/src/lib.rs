//! `pushdeck-auth`: the access-control gate in front of job creation.
//!
//! This crate is intentionally decoupled from HTTP and storage: grants are
//! read through the [`GrantStore`] contract.

pub mod grants;
pub mod guard;

pub use grants::{GrantLookupError, GrantStore, InMemoryGrantStore};
pub use guard::{check_website_access, AccessError, WebsiteAccess};
