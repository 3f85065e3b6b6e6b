/// API routes and handlers
pub mod admin;
pub mod auth;
pub mod middleware;
pub mod payments;
pub mod visitor_tokens;

use crate::{context::AppContext, error::EstateError};
use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .nest("/api/auth", auth::routes())
        .nest("/api/visitor-tokens", visitor_tokens::routes())
        .nest("/api/payments", payments::routes())
        .nest("/api/admin", admin::routes())
}

/// Success envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data,
        })
    }
}

/// JSON body that has passed its `validator` rules.
///
/// Malformed bodies are reported through the error envelope instead of
/// axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = EstateError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| EstateError::Validation(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}
