//! Per-website routes. Each one passes the access guard before producing.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
};

use pushdeck_core::{AdsId, ArticleId, WebsiteId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::AdminContext;

pub async fn push_article(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(admin): Extension<AdminContext>,
    Path((website_id, article_id)): Path<(String, String)>,
    Json(body): Json<dto::PushArticleRequest>,
) -> axum::response::Response {
    let Ok(website_id) = website_id.parse::<WebsiteId>() else {
        return errors::invalid_id("website");
    };
    let Ok(article_id) = article_id.parse::<ArticleId>() else {
        return errors::invalid_id("article");
    };

    let access = match services.guard(&website_id, admin.admin_id()).await {
        Ok(access) => access,
        Err(e) => return errors::access_error_to_response(e),
    };

    match services
        .producer
        .enqueue_article_push(&access, article_id, body.category_id)
        .await
    {
        Ok(job_id) => super::accepted(job_id),
        Err(e) => errors::produce_error_to_response(e),
    }
}

pub async fn remove_article(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(admin): Extension<AdminContext>,
    Path((website_id, article_id)): Path<(String, String)>,
) -> axum::response::Response {
    let Ok(website_id) = website_id.parse::<WebsiteId>() else {
        return errors::invalid_id("website");
    };
    let Ok(article_id) = article_id.parse::<ArticleId>() else {
        return errors::invalid_id("article");
    };

    let access = match services.guard(&website_id, admin.admin_id()).await {
        Ok(access) => access,
        Err(e) => return errors::access_error_to_response(e),
    };

    match services.producer.enqueue_article_removal(&access, article_id).await {
        Ok(job_id) => super::accepted(job_id),
        Err(e) => errors::produce_error_to_response(e),
    }
}

pub async fn push_ads(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(admin): Extension<AdminContext>,
    Path((website_id, ads_id)): Path<(String, String)>,
) -> axum::response::Response {
    let Ok(website_id) = website_id.parse::<WebsiteId>() else {
        return errors::invalid_id("website");
    };
    let Ok(ads_id) = ads_id.parse::<AdsId>() else {
        return errors::invalid_id("ads");
    };

    let access = match services.guard(&website_id, admin.admin_id()).await {
        Ok(access) => access,
        Err(e) => return errors::access_error_to_response(e),
    };

    match services.producer.enqueue_ads_push(&access, ads_id).await {
        Ok(job_id) => super::accepted(job_id),
        Err(e) => errors::produce_error_to_response(e),
    }
}
