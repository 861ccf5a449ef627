use std::sync::Arc;

use axum::{Json, extract::Extension};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

/// `emailData` may be omitted; the job then completes without sending.
pub async fn send_notification(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::NotificationRequest>,
) -> axum::response::Response {
    match services.producer.enqueue_notification(body.email_data).await {
        Ok(job_id) => super::accepted(job_id),
        Err(e) => errors::produce_error_to_response(e),
    }
}
