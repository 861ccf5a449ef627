use std::sync::Arc;

use pushdeck_auth::{AccessError, GrantStore, WebsiteAccess, check_website_access};
use pushdeck_core::{AdminId, WebsiteId};
use pushdeck_infra::jobs::{Broker, JobProducer};

/// Everything the route handlers need.
#[derive(Clone)]
pub struct AppServices {
    pub producer: JobProducer,
    pub grants: Arc<dyn GrantStore>,
}

impl AppServices {
    pub fn new(producer: JobProducer, grants: Arc<dyn GrantStore>) -> Self {
        Self { producer, grants }
    }

    /// Broker the producer enqueues into; also serves job status lookups.
    pub fn broker(&self) -> &Arc<dyn Broker> {
        self.producer.broker()
    }

    pub async fn guard(
        &self,
        website_id: &WebsiteId,
        admin_id: &AdminId,
    ) -> Result<WebsiteAccess, AccessError> {
        check_website_access(self.grants.as_ref(), website_id, admin_id).await
    }
}
