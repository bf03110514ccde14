//! Error-to-response mapping.
//!
//! Handlers resolve every recoverable condition at this boundary: client
//! input errors become 4xx, and the metadata-not-ready probe becomes 202
//! (a try-again signal, not a failure). Persistence failures never reach
//! a response at all; they are logged where they happen.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::engine::EngineError;
use crate::infohash::InfoHashError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request input; nothing was mutated.
    #[error("{0}")]
    BadRequest(String),

    /// The referenced torrent, file, or metadata does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Metadata is not available yet and the caller asked not to wait.
    #[error("info not ready")]
    NotReady,

    /// The requested byte range cannot be satisfied.
    #[error("range not satisfiable for length {0}")]
    RangeNotSatisfiable(u64),

    /// An operation the caller explicitly requested failed.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            Self::NotReady => (StatusCode::ACCEPTED, "info not ready").into_response(),
            Self::RangeNotSatisfiable(length) => {
                let mut response =
                    (StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable").into_response();
                if let Ok(value) = HeaderValue::try_from(format!("bytes */{length}")) {
                    response.headers_mut().insert(header::CONTENT_RANGE, value);
                }
                response
            }
            Self::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

impl From<InfoHashError> for ApiError {
    fn from(err: InfoHashError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::FileNotFound(_) => Self::NotFound(err.to_string()),
            EngineError::RangeOutOfBounds { length, .. } => Self::RangeNotSatisfiable(length),
            EngineError::InvalidMetadata(_) => Self::BadRequest(err.to_string()),
            EngineError::Closed => Self::NotFound(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::NotReady.into_response().status(),
            StatusCode::ACCEPTED
        );
        assert_eq!(
            ApiError::Internal("x".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_range_error_carries_content_range() {
        let response = ApiError::RangeNotSatisfiable(99).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_RANGE).unwrap(),
            "bytes */99"
        );
    }
}
