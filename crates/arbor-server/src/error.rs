//! API errors
//!
//! Request-level failures. Per-entity problems in a push batch are not
//! errors; they come back as conflicts inside a 200 response.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use arbor_core::protocol::ErrorBody;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Missing, malformed or unknown bearer token
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Body did not parse as the expected JSON
    #[error("Invalid payload: {0}")]
    InvalidJsonBody(#[from] JsonRejection),

    /// Request parsed but failed validation before any write
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("A database error has occurred")]
    Database(#[from] rusqlite::Error),

    #[error("An internal server error has occurred")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidJsonBody(_) | ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// Log the detail, answer with the generic message
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Database(err) => error!("Database error: {}", err),
            ApiError::Internal(msg) => error!("Internal error: {}", msg),
            ApiError::InvalidJsonBody(err) => tracing::debug!("Rejected body: {}", err.body_text()),
            other => tracing::debug!("{}", other),
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::Unauthorized("no token".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::InvalidRequest("empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Database(rusqlite::Error::InvalidQuery).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ApiError::Internal("lock poisoned at db.rs".into());
        assert_eq!(err.to_string(), "An internal server error has occurred");
    }
}
