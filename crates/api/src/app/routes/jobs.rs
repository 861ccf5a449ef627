use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use pushdeck_infra::jobs::JobId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

/// Jobs past their retention window answer 404 like unknown ids.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let Ok(job_id) = job_id.parse::<JobId>() else {
        return errors::invalid_id("job");
    };

    match services.broker().get(job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::JobView::from(job))).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("job {job_id} not found"),
        ),
        Err(e) => errors::broker_error_to_response(e),
    }
}
