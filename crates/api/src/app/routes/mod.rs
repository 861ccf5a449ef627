use axum::{
    Router,
    routing::{delete, get, post},
};

pub mod content;
pub mod jobs;
pub mod notifications;
pub mod system;
pub mod websites;

/// Router for all admin-authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/content", post(content::insert_content))
        .route(
            "/websites/:website_id/articles/:article_id/push",
            post(websites::push_article),
        )
        .route(
            "/websites/:website_id/articles/:article_id",
            delete(websites::remove_article),
        )
        .route("/websites/:website_id/ads/:ads_id/push", post(websites::push_ads))
        .route("/notifications", post(notifications::send_notification))
        .route("/jobs/:job_id", get(jobs::get_job))
}

/// `202 Accepted { jobId }`.
pub(crate) fn accepted(job_id: pushdeck_infra::jobs::JobId) -> axum::response::Response {
    use axum::response::IntoResponse;

    (
        axum::http::StatusCode::ACCEPTED,
        axum::Json(crate::app::dto::JobAccepted { job_id }),
    )
        .into_response()
}
