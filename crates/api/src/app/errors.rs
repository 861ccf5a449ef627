use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use pushdeck_auth::AccessError;
use pushdeck_infra::jobs::{BrokerError, ProduceError};

pub fn access_error_to_response(err: AccessError) -> axum::response::Response {
    match err {
        AccessError::PermissionDenied { .. } => {
            json_error(StatusCode::FORBIDDEN, "permission_denied", err.to_string())
        }
        AccessError::Lookup(e) => {
            error!(error = %e, "grant lookup failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

pub fn produce_error_to_response(err: ProduceError) -> axum::response::Response {
    match err {
        ProduceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ProduceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        ProduceError::Store(e) => {
            error!(error = %e, "entity store failed while producing a job");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
        ProduceError::Broker(e) => broker_error_to_response(e),
    }
}

pub fn broker_error_to_response(err: BrokerError) -> axum::response::Response {
    match err {
        BrokerError::Unavailable(msg) => {
            error!(error = %msg, "broker unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "broker_unavailable", msg)
        }
        BrokerError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found"))
        }
        other => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", other.to_string()),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}
