use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Conflict(msg) => Self::Conflict(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::Upstream {
                provider,
                status,
                message,
            } => {
                tracing::error!(provider, ?status, %message, "Upstream request failed");
                Self::Upstream(format!("{provider} request failed"))
            }
            AppError::DataIntegrity(msg) => Self::Unprocessable(msg),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Conflict(message) => (StatusCode::CONFLICT, message),
            Self::Upstream(message) => (StatusCode::BAD_GATEWAY, message),
            Self::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                status: "error".to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let api_error = ApiError::from(AppError::document_not_found("doc-1"));
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "document doc-1 not found"));

        let api_error = ApiError::from(AppError::already_processing("doc-1"));
        assert!(matches!(api_error, ApiError::Conflict(_)));

        let api_error = ApiError::from(AppError::Validation("invalid input".to_string()));
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "invalid input"));

        let api_error = ApiError::from(AppError::embedding_count_mismatch(2, 3));
        assert!(
            matches!(api_error, ApiError::Unprocessable(msg) if msg == "embedding count mismatch: got 2, expected 3")
        );

        let api_error = ApiError::from(AppError::upstream("qdrant", Some(503), "unavailable"));
        assert!(matches!(api_error, ApiError::Upstream(msg) if msg == "qdrant request failed"));

        let internal_error =
            AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "io error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(ApiError::Conflict("busy".to_string()), StatusCode::CONFLICT);
        assert_status_code(
            ApiError::Upstream("ollama request failed".to_string()),
            StatusCode::BAD_GATEWAY,
        );
        assert_status_code(
            ApiError::Unprocessable("no chunks".to_string()),
            StatusCode::UNPROCESSABLE_ENTITY,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
