/// Registration, login and session endpoints
use crate::{
    account::{
        LoginRequest, NewUser, RegisterRequest, RequestOtpRequest, Role, SessionResponse,
        UserProfile,
    },
    api::{ApiResponse, ValidatedJson},
    auth::AuthContext,
    context::AppContext,
    db::models::{Session, User},
    error::{EstateError, EstateResult},
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/request-otp", post(request_otp))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtpIssued {
    email: String,
    expires_in_seconds: i64,
}

fn session_response(user: &User, session: Session) -> EstateResult<SessionResponse> {
    Ok(SessionResponse {
        access_token: session.access_token,
        expires_at: session.expires_at,
        user: UserProfile::from_user(user)?,
    })
}

/// Send a registration code to an unregistered e-mail
async fn request_otp(
    State(ctx): State<AppContext>,
    ValidatedJson(req): ValidatedJson<RequestOtpRequest>,
) -> EstateResult<Json<ApiResponse<OtpIssued>>> {
    let email = req.email.trim().to_lowercase();
    ctx.rate_limiter.check_otp_request(&email)?;

    if ctx.account_manager.email_exists(&email).await? {
        return Err(EstateError::Conflict("Email already registered".to_string()));
    }

    let code = ctx.otp_manager.issue(&email).await?;
    let ttl = ctx.config.registration.otp_ttl;

    if let Err(e) = ctx
        .mailer
        .send_registration_otp(&email, &code, ttl / 60)
        .await
    {
        tracing::error!(email = %email, error = %e, "Failed to deliver registration OTP");
    }

    Ok(ApiResponse::ok(
        "Verification code sent",
        OtpIssued {
            email,
            expires_in_seconds: ttl,
        },
    ))
}

/// OTP-gated registration; responds with a fresh session
async fn register(
    State(ctx): State<AppContext>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> EstateResult<(StatusCode, Json<ApiResponse<SessionResponse>>)> {
    let role = Role::from_str(req.role.trim())?;

    // Reject before spending the OTP
    if !role.is_self_assignable() && !ctx.config.is_super_admin_email(&req.email) {
        return Err(EstateError::Authorization(format!(
            "Role {} cannot be self-assigned",
            role
        )));
    }
    if ctx.account_manager.email_exists(&req.email).await? {
        return Err(EstateError::Conflict("Email already registered".to_string()));
    }

    ctx.otp_manager.verify(&req.email, &req.otp).await?;

    let user = ctx
        .account_manager
        .create_user(NewUser {
            email: req.email,
            name: req.name,
            password: req.password,
            role,
            phone: req.phone,
            house_number: req.house_number,
        })
        .await?;
    let session = ctx.account_manager.create_session(&user.id).await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Registration successful", session_response(&user, session)?),
    ))
}

async fn login(
    State(ctx): State<AppContext>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> EstateResult<Json<ApiResponse<SessionResponse>>> {
    let (user, session) = ctx.account_manager.login(&req.email, &req.password).await?;
    tracing::info!(user_id = %user.id, "User logged in");

    Ok(ApiResponse::ok("Login successful", session_response(&user, session)?))
}

async fn logout(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> EstateResult<Json<ApiResponse<()>>> {
    ctx.account_manager
        .delete_session(&auth.session.session_id)
        .await?;

    Ok(ApiResponse::ok("Logged out", ()))
}

async fn me(auth: AuthContext) -> EstateResult<Json<ApiResponse<UserProfile>>> {
    Ok(ApiResponse::ok("Profile", UserProfile::from_user(&auth.user)?))
}

#[cfg(test)]
mod tests {
    use crate::account::Role;
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_otp_registration_flow() {
        let app = TestApp::new().await;

        let (status, body) = app
            .post("/api/auth/request-otp", None, json!({"email": "Ngozi@Estate.test"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["email"], "ngozi@estate.test");

        // The plain code only goes out by mail; issue a known one for the test
        let code = app.ctx.otp_manager.issue("ngozi@estate.test").await.unwrap();

        let register = json!({
            "email": "ngozi@estate.test",
            "otp": code,
            "name": "Ngozi",
            "password": "password123",
            "role": "resident",
            "houseNumber": "12B"
        });
        let (status, body) = app.post("/api/auth/register", None, register.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["user"]["role"], "resident");
        assert_eq!(body["data"]["user"]["houseNumber"], "12B");
        let token = body["data"]["accessToken"].as_str().unwrap().to_string();

        let (status, body) = app.get("/api/auth/me", Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["email"], "ngozi@estate.test");

        // Registered addresses cannot ask for another code
        let (status, body) = app
            .post("/api/auth/request-otp", None, json!({"email": "ngozi@estate.test"}))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_register_rejects_wrong_otp_and_super_role() {
        let app = TestApp::new().await;
        app.ctx.otp_manager.issue("eve@estate.test").await.unwrap();

        let mut register = json!({
            "email": "eve@estate.test",
            "otp": "000000",
            "name": "Eve",
            "password": "password123",
            "role": "super"
        });
        let (status, _) = app.post("/api/auth/register", None, register.clone()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        register["role"] = json!("landlord");
        let code = app.ctx.otp_manager.issue("eve@estate.test").await.unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        register["otp"] = json!(wrong);
        let (status, body) = app.post("/api/auth/register", None, register).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_register_validation_envelope() {
        let app = TestApp::new().await;
        let (status, body) = app
            .post(
                "/api/auth/register",
                None,
                json!({"email": "not-an-email", "otp": "1", "name": "", "password": "x", "role": "resident"}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = app
            .post("/api/auth/login", None, json!({"email": "missing-password@estate.test"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_logout() {
        let app = TestApp::new().await;
        app.login_as("guard@estate.test", Role::Security).await;

        let (status, body) = app
            .post(
                "/api/auth/login",
                None,
                json!({"email": "guard@estate.test", "password": "password123"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["data"]["accessToken"].as_str().unwrap().to_string();

        let (status, _) = app
            .post("/api/auth/logout", Some(&token), json!({}))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.get("/api/auth/me", Some(&token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AuthenticationRequired");

        let (status, _) = app
            .post(
                "/api/auth/login",
                None,
                json!({"email": "guard@estate.test", "password": "wrong-password"}),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
