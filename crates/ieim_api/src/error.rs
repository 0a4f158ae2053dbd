use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Maps one-to-one onto the HTTP status codes documented for this
/// surface: `401`/`403` for auth failures, `404` for missing resources,
/// `409` when a write target is ambiguous, `412` for an `If-Match`
/// mismatch, `400` for malformed input, and `500` for anything else.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("actor lacks the required capability: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("artifact ambiguous: {0}")]
    ArtifactAmbiguous(String),
    #[error("etag mismatch")]
    EtagMismatch,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ieim_hitl::ReviewStoreError> for ApiError {
    fn from(e: ieim_hitl::ReviewStoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ieim_hitl::HitlServiceError> for ApiError {
    fn from(e: ieim_hitl::HitlServiceError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ieim_common::CanonError> for ApiError {
    fn from(e: ieim_common::CanonError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::ArtifactAmbiguous(_) => (StatusCode::CONFLICT, "ARTIFACT_AMBIGUOUS"),
            ApiError::EtagMismatch => (StatusCode::PRECONDITION_FAILED, "ETAG_MISMATCH"),
            ApiError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "FAILED"),
        };
        (status, Json(json!({"error": code, "message": self.to_string()}))).into_response()
    }
}
