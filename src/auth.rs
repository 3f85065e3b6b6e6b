/// Authentication extractors
///
/// The session, the user row and the role's capability set are resolved once
/// here; handlers only ask `require(capability)`.
use crate::{
    account::{Capability, Role, ValidatedSession},
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::models::User,
    error::{EstateError, EstateResult},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - extracts and validates session from request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub role: Role,
    pub session: ValidatedSession,
}

impl AuthContext {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.has(capability)
    }

    /// Fail with an authorization error unless the role grants `capability`
    pub fn require(&self, capability: Capability) -> EstateResult<()> {
        if self.can(capability) {
            Ok(())
        } else {
            tracing::debug!(
                user_id = %self.user.id,
                role = %self.role,
                ?capability,
                "Capability check failed"
            );
            Err(EstateError::Authorization(format!(
                "Role {} is not permitted to perform this action",
                self.role
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = EstateError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        // Reuse a session already resolved by middleware
        if let Some(ctx) = parts.extensions.get::<AuthContext>() {
            return Ok(ctx.clone());
        }

        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| EstateError::Authentication("Missing authorization header".to_string()))?;

        let ctx = resolve(state, &token).await?;
        parts.extensions.insert(ctx.clone());
        Ok(ctx)
    }
}

/// Resolve a bearer token into a full auth context
pub async fn resolve(state: &AppContext, token: &str) -> EstateResult<AuthContext> {
    let session = state.account_manager.validate_access_token(token).await?;
    let user = state.account_manager.get_user(&session.user_id).await?;

    if user.deactivated_at.is_some() {
        return Err(EstateError::Authorization("Account is deactivated".to_string()));
    }

    let role = Role::from_str(&user.role)?;

    Ok(AuthContext { user, role, session })
}
