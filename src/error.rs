/// Unified error types for Estate Gate
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum EstateError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict errors (duplicate e-mail, token already used, ...)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Time-bounded resources past their window
    #[error("Expired: {0}")]
    Expired(String),

    /// Issuer has no active subscription
    #[error("Subscription required: {0}")]
    SubscriptionRequired(String),

    /// Rate limiting errors
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: std::time::Duration },

    /// Payment gateway errors
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for EstateError {
    fn from(errors: validator::ValidationErrors) -> Self {
        EstateError::Validation(errors.to_string())
    }
}

/// Error envelope returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub error: String,
}

/// Convert EstateError to HTTP response
impl IntoResponse for EstateError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            EstateError::RateLimitExceeded { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };

        let (status, error_code, message) = match self {
            EstateError::Authentication(_) | EstateError::Jwt(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            EstateError::Authorization(_) => (StatusCode::FORBIDDEN, "Forbidden", self.to_string()),
            EstateError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            EstateError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound", self.to_string()),
            EstateError::Conflict(_) => (StatusCode::CONFLICT, "Conflict", self.to_string()),
            EstateError::Expired(_) => (StatusCode::GONE, "Expired", self.to_string()),
            EstateError::SubscriptionRequired(_) => (
                StatusCode::PAYMENT_REQUIRED,
                "SubscriptionRequired",
                self.to_string(),
            ),
            EstateError::RateLimitExceeded { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RateLimitExceeded",
                "Rate limit exceeded".to_string(),
            ),
            EstateError::Gateway(ref detail) => {
                tracing::error!("Payment gateway failure: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    "GatewayError",
                    "Payment gateway unavailable".to_string(),
                )
            }
            EstateError::Database(ref e) => {
                tracing::error!("Database failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(), // Don't leak details
                )
            }
            EstateError::Internal(ref detail) => {
                tracing::error!("Internal failure: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "InternalServerError",
                    "Internal server error".to_string(),
                )
            }
            EstateError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: error_code.to_string(),
        });

        let mut response = (status, body).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// Result type alias for service operations
pub type EstateResult<T> = Result<T, EstateError>;
