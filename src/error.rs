//! 중앙화된 에러 처리 모듈.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-wide error type.
///
/// All errors in the application should be converted to this type
/// for consistent error handling and reporting.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad request error (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Unauthorized error (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Not found error (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Share existed but is expired or used up (410)
    #[error("Gone: {0}")]
    Gone(String),

    /// Upload exceeds the configured limits (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Too many failed share code lookups (429)
    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Encryption or decryption failure (500)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis cache error
    #[error("Cache error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    /// Redis pool error
    #[error("Cache pool error: {0}")]
    RedisPool(#[from] deadpool_redis::PoolError),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Template rendering error
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed multipart upload
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),

    /// QR code encoding error
    #[error("QR code error: {0}")]
    Qr(#[from] qrcode::types::QrError),

    /// PNG encoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// ZIP archive error
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Status code and client-facing message.
    ///
    /// Infrastructure failures only expose a generic message; the detail goes
    /// to the log.
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::BadRequest(msg) | Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Gone(msg) => (StatusCode::GONE, msg.clone()),
            Self::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            Self::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::Jwt(e) => (StatusCode::UNAUTHORIZED, format!("JWT error: {e}")),
            Self::Json(e) => (StatusCode::BAD_REQUEST, format!("JSON error: {e}")),
            Self::Multipart(e) => (e.status(), format!("Invalid upload: {}", e.body_text())),
            Self::Crypto(_) => opaque("Decryption failed"),
            Self::Database(_) => opaque("Database error occurred"),
            Self::Redis(_) => opaque("Cache error occurred"),
            Self::RedisPool(_) => opaque("Cache connection error occurred"),
            Self::Template(_) => opaque("Template rendering error"),
            Self::Qr(_) | Self::Image(_) => opaque("QR code generation failed"),
            Self::Zip(_) => opaque("Archive creation failed"),
            Self::Io(_) => opaque("I/O error occurred"),
        }
    }
}

fn opaque(message: &str) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = ?self, "Request failed");
            // Report error to Sentry for server errors
            sentry::capture_error(&self);
        } else if matches!(self, Self::Jwt(_) | Self::Multipart(_)) {
            tracing::warn!(error = %self, "Rejected request");
        }

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using `AppError`.
pub type AppResult<T> = Result<T, AppError>;

/// Helper trait for converting validation errors.
pub trait ValidationErrorExt {
    fn to_validation_error(&self) -> AppError;
}

impl ValidationErrorExt for validator::ValidationErrors {
    fn to_validation_error(&self) -> AppError {
        // Get the first field error for a clean message
        if let Some((field, errors)) = self.field_errors().iter().next() {
            if let Some(error) = errors.first() {
                let message = error.message.as_ref().map_or_else(
                    || {
                        format!(
                            "Validation failed on field '{field}' with tag '{}'",
                            error.code
                        )
                    },
                    std::string::ToString::to_string,
                );
                return AppError::Validation(message);
            }
        }
        AppError::Validation(self.to_string())
    }
}
