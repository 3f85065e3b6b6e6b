/// Admin API endpoints, restricted to the super role
use crate::{
    account::{Capability, Role, UserProfile},
    api::ApiResponse,
    auth::AuthContext,
    context::AppContext,
    error::EstateResult,
    payments::PaymentStats,
};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Build admin API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/users", get(get_users))
        .route("/stats", get(get_stats))
}

#[derive(Deserialize)]
struct UsersQuery {
    role: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EstateStats {
    users_by_role: BTreeMap<String, i64>,
    visitor_tokens: i64,
    visitors_on_premises: i64,
    payments: PaymentStats,
}

async fn get_users(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<UsersQuery>,
) -> EstateResult<Json<ApiResponse<Vec<UserProfile>>>> {
    auth.require(Capability::Administer)?;

    let role = query.role.as_deref().map(Role::from_str).transpose()?;
    let users = ctx
        .account_manager
        .list_users(role, query.limit.unwrap_or(50), query.offset.unwrap_or(0))
        .await?;

    let profiles = users
        .iter()
        .map(UserProfile::from_user)
        .collect::<EstateResult<Vec<_>>>()?;

    Ok(ApiResponse::ok("Users", profiles))
}

async fn get_stats(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> EstateResult<Json<ApiResponse<EstateStats>>> {
    auth.require(Capability::Administer)?;

    let users_by_role = ctx.account_manager.count_by_role().await?.into_iter().collect();
    let (visitor_tokens, visitors_on_premises) = ctx.visitor_manager.stats().await?;
    let payments = ctx.payment_manager.stats().await?;

    Ok(ApiResponse::ok(
        "Estate statistics",
        EstateStats {
            users_by_role,
            visitor_tokens,
            visitors_on_premises,
            payments,
        },
    ))
}
