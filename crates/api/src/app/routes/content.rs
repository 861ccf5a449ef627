use std::sync::Arc;

use axum::{Json, extract::Extension};
use tracing::info;

use pushdeck_core::Content;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::AdminContext;

/// Content rows are not website-scoped; any authenticated admin may insert.
pub async fn insert_content(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(admin): Extension<AdminContext>,
    Json(content): Json<Content>,
) -> axum::response::Response {
    info!(admin_id = %admin.admin_id(), content_id = %content.id, "content insert requested");

    match services.producer.enqueue_content_insert(content).await {
        Ok(job_id) => super::accepted(job_id),
        Err(e) => errors::produce_error_to_response(e),
    }
}
