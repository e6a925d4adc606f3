//! API error types and error response formatting.
//!
//! Admission failures map onto a fixed set of statuses that clients branch
//! on: 400 for missing or garbled session data, 401 when the tenant role is
//! too low, 403 when the subscription forbids writes, 429 from the rate
//! limiter and 500 for collaborator or signing failures.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use folio_core::error::FolioError;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "forbidden").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// 400 Bad Request - session data absent or malformed, invalid invite.
    BadRequest(String),
    /// 401 Unauthorized - role missing or below the route's minimum.
    Unauthorized(String),
    /// 403 Forbidden - the organization's subscription does not allow writes.
    Forbidden(String),
    /// 404 Not Found - referenced record does not exist.
    NotFound(String),
    /// 429 Too Many Requests - rejected by the rate limiter.
    TooManyRequests { retry_after_secs: u64 },
    /// 500 Internal Server Error - collaborator or signing failure.
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Internal(msg) => write!(f, "{}: {}", self.status(), msg),
            ApiError::TooManyRequests { retry_after_secs } => {
                write!(f, "{}: retry after {}s", self.status(), retry_after_secs)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message) = match self {
            ApiError::TooManyRequests { retry_after_secs } => {
                // Plain text with a retry hint; no session is touched on this path.
                let mut response = (status, "Too many requests\n").into_response();
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(retry_after_secs),
                );
                return response;
            }
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Unauthorized(msg) => ("unauthorized", msg),
            ApiError::Forbidden(msg) => ("forbidden", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<FolioError> for ApiError {
    fn from(err: FolioError) -> Self {
        match err {
            FolioError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
