//! The taxonomy from spec.md §7, mapped onto HTTP status codes for
//! everything outside the WS pipeline. Inside the pipeline, failures
//! never take this path — they become a `qos_warning`, a
//! `translation_failed` subtitle, or silent absence (spec §4.7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use lams_services::dao::base::DaoError;

#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    Auth(String),
    NotFound(String),
    Forbidden(String),
    Unavailable(String),
    Timeout(String),
    UpstreamApi(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(m) => write!(f, "validation: {m}"),
            ApiError::Auth(m) => write!(f, "auth: {m}"),
            ApiError::NotFound(m) => write!(f, "not_found: {m}"),
            ApiError::Forbidden(m) => write!(f, "forbidden: {m}"),
            ApiError::Unavailable(m) => write!(f, "unavailable: {m}"),
            ApiError::Timeout(m) => write!(f, "timeout: {m}"),
            ApiError::UpstreamApi(m) => write!(f, "upstream_api: {m}"),
            ApiError::Internal(m) => write!(f, "internal: {m}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, tag, message) = match self {
            ApiError::Validation(m) => (StatusCode::BAD_REQUEST, "validation", m),
            ApiError::Auth(m) => (StatusCode::UNAUTHORIZED, "auth", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", m),
            ApiError::Timeout(m) => (StatusCode::GATEWAY_TIMEOUT, "timeout", m),
            ApiError::UpstreamApi(m) => (StatusCode::BAD_GATEWAY, "upstream_api", m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", m),
        };
        (
            status,
            Json(ErrorResponse {
                error: tag.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

impl From<DaoError> for ApiError {
    fn from(err: DaoError) -> Self {
        match err {
            DaoError::NotFound => ApiError::NotFound("resource not found".into()),
            DaoError::DuplicateKey => ApiError::Validation("duplicate key".into()),
            DaoError::Validation(m) => ApiError::Validation(m),
            DaoError::Mongo(e) => ApiError::Internal(e.to_string()),
            DaoError::BsonSer(e) => ApiError::Internal(e.to_string()),
            DaoError::BsonDe(e) => ApiError::Internal(e.to_string()),
        }
    }
}
