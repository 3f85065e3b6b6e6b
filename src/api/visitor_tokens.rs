/// Visitor token endpoints: issuing on the resident side, verification and
/// check-in/check-out on the guard side
use crate::{
    account::Capability,
    api::{ApiResponse, ValidatedJson},
    auth::AuthContext,
    context::AppContext,
    error::{EstateError, EstateResult},
    visitor::{
        ExitOutcome, ExitTarget, ExitVisitorRequest, GenerateTokenRequest, GrantEntryRequest,
        TokenSummary, VerifyOutcome, VerifyTokenRequest, VisitorEntry, VisitorToken,
    },
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build visitor token routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/generate", post(generate))
        .route("/verify", post(verify))
        .route("/grant-entry", post(grant_entry))
        .route("/exit-visitor", post(exit_visitor))
        .route("/active-entries", get(active_entries))
        .route("/all-entries", get(all_entries))
        .route("/my-tokens", get(my_tokens))
}

#[derive(Debug, Deserialize)]
struct Page {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn generate(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<GenerateTokenRequest>,
) -> EstateResult<(StatusCode, Json<ApiResponse<VisitorToken>>)> {
    auth.require(Capability::IssueTokens)?;

    let token = ctx
        .visitor_manager
        .generate_token(auth.user_id(), auth.role, req)
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Visitor token generated", token),
    ))
}

async fn verify(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<VerifyTokenRequest>,
) -> EstateResult<Json<ApiResponse<VerifyOutcome>>> {
    auth.require(Capability::ManageEntries)?;

    let outcome = ctx.visitor_manager.verify_token(&req.code).await?;
    let message = if outcome.is_granted {
        "Visitor has already been granted entry"
    } else {
        "Token is valid"
    };

    Ok(ApiResponse::ok(message, outcome))
}

async fn grant_entry(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<GrantEntryRequest>,
) -> EstateResult<Json<ApiResponse<VisitorEntry>>> {
    auth.require(Capability::ManageEntries)?;

    let entry = ctx
        .visitor_manager
        .grant_entry(&req.code, auth.user_id(), req.note)
        .await?;

    Ok(ApiResponse::ok("Entry granted", entry))
}

async fn exit_visitor(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<ExitVisitorRequest>,
) -> EstateResult<Json<ApiResponse<ExitOutcome>>> {
    auth.require(Capability::ManageEntries)?;

    let target = match (req.entry_id, req.code) {
        (Some(id), _) => ExitTarget::Entry(id),
        (None, Some(code)) if !code.trim().is_empty() => ExitTarget::Code(code),
        _ => {
            return Err(EstateError::Validation(
                "Either entryId or code is required".to_string(),
            ))
        }
    };

    let outcome = ctx
        .visitor_manager
        .record_exit(target, auth.user_id(), req.note)
        .await?;

    Ok(ApiResponse::ok("Exit recorded", outcome))
}

async fn active_entries(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> EstateResult<Json<ApiResponse<Vec<VisitorEntry>>>> {
    auth.require(Capability::ManageEntries)?;

    let entries = ctx.visitor_manager.active_entries().await?;
    Ok(ApiResponse::ok("Visitors on premises", entries))
}

async fn all_entries(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(page): Query<Page>,
) -> EstateResult<Json<ApiResponse<Vec<VisitorEntry>>>> {
    auth.require(Capability::ManageEntries)?;

    let entries = ctx
        .visitor_manager
        .all_entries(page.limit.unwrap_or(50), page.offset.unwrap_or(0))
        .await?;
    Ok(ApiResponse::ok("Visitor entries", entries))
}

async fn my_tokens(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(page): Query<Page>,
) -> EstateResult<Json<ApiResponse<Vec<TokenSummary>>>> {
    auth.require(Capability::IssueTokens)?;

    let tokens = ctx
        .visitor_manager
        .my_tokens(auth.user_id(), page.limit.unwrap_or(50))
        .await?;
    Ok(ApiResponse::ok("Your visitor tokens", tokens))
}

#[cfg(test)]
mod tests {
    use crate::account::Role;
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    async fn subscribed_resident(app: &TestApp) -> String {
        let token = app.login_as("resident@estate.test", Role::Resident).await;
        let (_, body) = app
            .post(
                "/api/payments/initialize",
                Some(&token),
                json!({"packageType": "resident", "period": "monthly", "amount": 5000}),
            )
            .await;
        let tx_ref = body["data"]["txRef"].as_str().unwrap().to_string();
        app.gateway.settle(
            &tx_ref,
            crate::payments::GatewayStatus::Successful,
            5000.0,
            "NGN",
        );
        let (status, _) = app
            .get(&format!("/api/payments/verify/{}", tx_ref), Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
        token
    }

    #[tokio::test]
    async fn test_gate_flow_over_http() {
        let app = TestApp::new().await;
        let resident = subscribed_resident(&app).await;
        let guard = app.login_as("guard@estate.test", Role::Security).await;

        let (status, body) = app
            .post(
                "/api/visitor-tokens/generate",
                Some(&resident),
                json!({"visitorName": "Chidi", "visitorPhone": "+2348011112222", "type": "short", "duration": 2}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let code = body["data"]["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 8);

        let (status, body) = app
            .post("/api/visitor-tokens/verify", Some(&guard), json!({"code": code}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["isValid"], true);
        assert_eq!(body["data"]["isGranted"], false);
        assert_eq!(body["data"]["issuer"]["houseNumber"], "D4");

        let (status, body) = app
            .post("/api/visitor-tokens/grant-entry", Some(&guard), json!({"code": code}))
            .await;
        assert_eq!(status, StatusCode::OK);
        let entry_id = body["data"]["id"].as_i64().unwrap();

        let (status, body) = app
            .post("/api/visitor-tokens/grant-entry", Some(&guard), json!({"code": code}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (_, body) = app.get("/api/visitor-tokens/active-entries", Some(&guard)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = app
            .post(
                "/api/visitor-tokens/exit-visitor",
                Some(&guard),
                json!({"entryId": entry_id, "note": "left with parcel"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["durationMinutes"].as_i64().unwrap() >= 0);

        let (_, body) = app.get("/api/visitor-tokens/active-entries", Some(&guard)).await;
        assert!(body["data"].as_array().unwrap().is_empty());

        let (_, body) = app.get("/api/visitor-tokens/all-entries?limit=10", Some(&guard)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (_, body) = app.get("/api/visitor-tokens/my-tokens", Some(&resident)).await;
        assert_eq!(body["data"][0]["state"], "exited");
    }

    #[tokio::test]
    async fn test_unsubscribed_resident_gets_402() {
        let app = TestApp::new().await;
        let resident = app.login_as("late-payer@estate.test", Role::Resident).await;

        let (status, body) = app
            .post(
                "/api/visitor-tokens/generate",
                Some(&resident),
                json!({"visitorName": "Bola", "type": "short", "duration": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"], "SubscriptionRequired");
    }

    #[tokio::test]
    async fn test_role_boundaries() {
        let app = TestApp::new().await;
        let resident = app.login_as("resident@estate.test", Role::Resident).await;
        let guard = app.login_as("guard@estate.test", Role::Security).await;

        let (status, _) = app
            .post("/api/visitor-tokens/verify", Some(&resident), json!({"code": "ABCDEFGH"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .post(
                "/api/visitor-tokens/generate",
                Some(&guard),
                json!({"visitorName": "Bola", "type": "short", "duration": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.get("/api/visitor-tokens/active-entries", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app
            .post("/api/visitor-tokens/verify", Some(&guard), json!({"code": "ABCDEFGH"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .post("/api/visitor-tokens/exit-visitor", Some(&guard), json!({}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
