/// Subscription payment endpoints
use crate::{
    api::{ApiResponse, ValidatedJson},
    auth::AuthContext,
    context::AppContext,
    error::{EstateError, EstateResult},
    payments::{
        InitializePaymentRequest, InitializedPayment, Package, Payment, Settlement,
        SubscriptionStatusView,
    },
};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Build payment routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/packages", get(packages))
        .route("/initialize", post(initialize))
        .route("/verify/:tx_ref", get(verify))
        .route("/webhook", post(webhook))
        .route("/history", get(history))
        .route("/subscription-status", get(subscription_status))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

/// Flutterwave webhook body; only the reference is used
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    event: Option<String>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    #[serde(alias = "txRef")]
    tx_ref: String,
}

async fn packages(State(ctx): State<AppContext>) -> Json<ApiResponse<Vec<Package>>> {
    ApiResponse::ok("Subscription packages", ctx.payment_manager.packages())
}

async fn initialize(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ValidatedJson(req): ValidatedJson<InitializePaymentRequest>,
) -> EstateResult<(StatusCode, Json<ApiResponse<InitializedPayment>>)> {
    let payment = ctx
        .payment_manager
        .initialize_payment(auth.user_id(), auth.role, req)
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok("Payment initialized", payment),
    ))
}

async fn verify(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(tx_ref): Path<String>,
) -> EstateResult<Json<ApiResponse<Settlement>>> {
    let settlement = ctx
        .payment_manager
        .verify_payment(&tx_ref, auth.user_id(), auth.role)
        .await?;

    let message = match settlement.payment.status {
        crate::payments::PaymentStatus::Paid => "Payment successful",
        crate::payments::PaymentStatus::Pending => "Payment is still pending",
        _ => "Payment was not successful",
    };
    Ok(ApiResponse::ok(message, settlement))
}

async fn webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> EstateResult<Json<ApiResponse<Settlement>>> {
    // Authenticate before the body is looked at
    let hash = headers.get("verif-hash").and_then(|v| v.to_str().ok());
    ctx.payment_manager.check_webhook_hash(hash)?;

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| EstateError::Validation(format!("Invalid webhook payload: {}", e)))?;

    tracing::info!(
        tx_ref = %payload.data.tx_ref,
        event = payload.event.as_deref().unwrap_or("unknown"),
        "Payment webhook received"
    );

    let settlement = ctx.payment_manager.handle_webhook(&payload.data.tx_ref).await?;
    Ok(ApiResponse::ok("Webhook processed", settlement))
}

async fn history(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<HistoryQuery>,
) -> EstateResult<Json<ApiResponse<Vec<Payment>>>> {
    let payments = ctx
        .payment_manager
        .history(auth.user_id(), query.limit.unwrap_or(20))
        .await?;
    Ok(ApiResponse::ok("Payment history", payments))
}

async fn subscription_status(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> EstateResult<Json<ApiResponse<SubscriptionStatusView>>> {
    let status = ctx.payment_manager.subscription_status(auth.user_id()).await?;
    Ok(ApiResponse::ok("Subscription status", status))
}

#[cfg(test)]
mod tests {
    use crate::account::Role;
    use crate::api::test_support::TestApp;
    use crate::config::{test_config, GatewayConfig};
    use crate::payments::GatewayStatus;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn start_payment(app: &TestApp, token: &str) -> String {
        let (status, body) = app
            .post(
                "/api/payments/initialize",
                Some(token),
                json!({"packageType": "landlord", "period": "6months", "amount": 30000}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["data"]["checkoutLink"]
            .as_str()
            .unwrap()
            .starts_with("https://checkout.test/"));
        body["data"]["txRef"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_packages_are_public() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/payments/packages", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_pay_verify_and_status() {
        let app = TestApp::new().await;
        let token = app.login_as("landlord@estate.test", Role::Landlord).await;

        let (_, body) = app.get("/api/payments/subscription-status", Some(&token)).await;
        assert_eq!(body["data"]["active"], false);

        let tx_ref = start_payment(&app, &token).await;

        let uri = format!("/api/payments/verify/{}", tx_ref);
        let (status, body) = app.get(&uri, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment"]["status"], "pending");

        app.gateway
            .settle(&tx_ref, GatewayStatus::Successful, 30000.0, "NGN");
        let (status, body) = app.get(&uri, Some(&token)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["payment"]["status"], "paid");
        assert_eq!(body["data"]["standing"]["paymentCount"], 6);

        let (_, body) = app.get("/api/payments/subscription-status", Some(&token)).await;
        assert_eq!(body["data"]["active"], true);
        assert_eq!(body["data"]["subscription"]["period"], "6months");

        let (_, body) = app.get("/api/payments/history?limit=5", Some(&token)).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_amount_and_foreign_verify() {
        let app = TestApp::new().await;
        let token = app.login_as("landlord@estate.test", Role::Landlord).await;
        let other = app.login_as("resident@estate.test", Role::Resident).await;

        let (status, body) = app
            .post(
                "/api/payments/initialize",
                Some(&token),
                json!({"packageType": "landlord", "period": "monthly", "amount": 1}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let tx_ref = start_payment(&app, &token).await;
        let (status, _) = app
            .get(&format!("/api/payments/verify/{}", tx_ref), Some(&other))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.get("/api/payments/verify/EG-missing", Some(&token)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn webhook_app() -> TestApp {
        let mut config = test_config();
        config.payments.gateway = Some(GatewayConfig {
            secret_key: "FLWSECK_TEST-unused".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            redirect_url: "http://localhost/payments/done".to_string(),
            webhook_hash: Some("shared-hash".to_string()),
        });
        TestApp::with_config(config).await
    }

    async fn send_webhook(app: &TestApp, hash: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/payments/webhook")
            .header("content-type", "application/json");
        if let Some(hash) = hash {
            request = request.header("verif-hash", hash);
        }
        let request = request.body(Body::from(body.to_string())).unwrap();

        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_webhook_authenticates_before_parsing() {
        let app = webhook_app().await;

        let (status, body) = send_webhook(&app, None, "{not json").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "AuthenticationRequired");

        let (status, body) = send_webhook(&app, Some("wrong"), r#"{"data": {}}"#).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "AuthenticationRequired");

        let (status, body) = send_webhook(&app, Some("shared-hash"), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_webhook_requires_hash_and_settles() {
        let app = webhook_app().await;
        let token = app.login_as("landlord@estate.test", Role::Landlord).await;
        let tx_ref = start_payment(&app, &token).await;
        app.gateway
            .settle(&tx_ref, GatewayStatus::Successful, 30000.0, "NGN");

        let payload = json!({"event": "charge.completed", "data": {"tx_ref": tx_ref}});

        let (status, _) = app.post("/api/payments/webhook", None, payload.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri("/api/payments/webhook")
            .header("content-type", "application/json")
            .header("verif-hash", "shared-hash")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, body) = app.get("/api/payments/subscription-status", Some(&token)).await;
        assert_eq!(body["data"]["active"], true);
    }
}
