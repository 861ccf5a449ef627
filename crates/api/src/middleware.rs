use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use pushdeck_core::AdminId;

use crate::app::errors;
use crate::context::AdminContext;

/// Header carrying the authenticated admin id.
pub const ADMIN_HEADER: &str = "x-admin-id";

pub async fn admin_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let admin_id = extract_admin(req.headers()).ok_or_else(|| {
        errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            format!("missing {ADMIN_HEADER} header"),
        )
    })?;

    req.extensions_mut().insert(AdminContext::new(admin_id));
    Ok(next.run(req).await)
}

fn extract_admin(headers: &HeaderMap) -> Option<AdminId> {
    let value = headers.get(ADMIN_HEADER)?.to_str().ok()?;
    value.parse().ok()
}
