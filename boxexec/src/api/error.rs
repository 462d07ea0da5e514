//! API error responses.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use boxexec_shared::constants::messages;
use boxexec_shared::errors::BoxexecError;
use boxexec_shared::wire::ErrorMessage;
use thiserror::Error;
use tracing::{debug, error};

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Exec(#[from] BoxexecError),

    /// Non-JSON create request in compatibility mode: a bare 500 with a fixed
    /// plain-text body instead of the usual JSON message.
    #[error("request content type is not application/json")]
    Misconfigured,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Exec(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            ApiError::Misconfigured => {
                debug!("Rejected request with non-JSON content type");
                (
                    status,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    messages::GENERIC_INTERNAL_ERROR,
                )
                    .into_response()
            }
            ApiError::Exec(err) => {
                let message = err.to_string();
                if status.is_server_error() {
                    error!(status = status.as_u16(), message = %message, "API error");
                } else {
                    debug!(status = status.as_u16(), message = %message, "Client error");
                }
                (status, Json(ErrorMessage { message })).into_response()
            }
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::from(BoxexecError::SessionNotFound("x".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = ApiError::from(BoxexecError::UnsupportedMediaType("text/plain".into()));
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        assert_eq!(
            ApiError::Misconfigured.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_misconfigured_is_plain_text() {
        let response = ApiError::Misconfigured.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
