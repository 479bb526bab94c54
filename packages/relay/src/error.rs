use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Application-specific error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Destination not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded, window resets at {reset_time}")]
    RateLimited { reset_time: DateTime<Utc> },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<DateTime<Utc>>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Signature(_) => StatusCode::BAD_REQUEST,
            AppError::Payload(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let error_code = match self {
            AppError::Signature(_) => "invalid_signature",
            AppError::Payload(_) => "invalid_payload",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound(_) => "not_found",
            AppError::RateLimited { .. } => "rate_limit_exceeded",
            AppError::Configuration(_) => "configuration_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        };

        let reset_time = match self {
            AppError::RateLimited { reset_time } => Some(*reset_time),
            _ => None,
        };

        HttpResponse::build(status).json(ErrorResponse {
            error: error_code.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
            reset_time,
        })
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
