/// Payment gateway client (Flutterwave v3)
use crate::{
    config::GatewayConfig,
    error::{EstateError, EstateResult},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hosted checkout request
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub tx_ref: String,
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
    pub plan_id: Option<String>,
    pub description: String,
}

/// Gateway's view of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Successful,
    Pending,
    Failed,
}

#[derive(Debug, Clone)]
pub struct GatewayVerification {
    pub status: GatewayStatus,
    pub tx_ref: String,
    /// Charged amount in whole currency units
    pub amount: f64,
    pub currency: String,
    pub transaction_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout and return its link
    async fn create_checkout(&self, request: &CheckoutRequest) -> EstateResult<String>;

    /// Look up a transaction by our reference
    async fn verify(&self, tx_ref: &str) -> EstateResult<GatewayVerification>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CheckoutData {
    link: String,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: Option<i64>,
    tx_ref: String,
    amount: f64,
    currency: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct CheckoutBody<'a> {
    tx_ref: &'a str,
    amount: i64,
    currency: &'a str,
    redirect_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_plan: Option<&'a str>,
    customer: Customer<'a>,
    customizations: Customizations<'a>,
}

#[derive(Debug, Serialize)]
struct Customer<'a> {
    email: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct Customizations<'a> {
    title: &'a str,
}

pub struct FlutterwaveGateway {
    http_client: Client,
    config: GatewayConfig,
}

impl FlutterwaveGateway {
    pub fn new(config: GatewayConfig) -> EstateResult<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("estate-gate/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| EstateError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

fn parse_status(status: &str) -> GatewayStatus {
    match status.to_ascii_lowercase().as_str() {
        "successful" | "success" | "completed" => GatewayStatus::Successful,
        "failed" | "cancelled" | "error" => GatewayStatus::Failed,
        _ => GatewayStatus::Pending,
    }
}

#[async_trait]
impl PaymentGateway for FlutterwaveGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> EstateResult<String> {
        let body = CheckoutBody {
            tx_ref: &request.tx_ref,
            amount: request.amount,
            currency: &request.currency,
            redirect_url: &self.config.redirect_url,
            payment_plan: request.plan_id.as_deref(),
            customer: Customer {
                email: &request.customer_email,
                name: &request.customer_name,
            },
            customizations: Customizations {
                title: &request.description,
            },
        };

        let response = self
            .http_client
            .post(self.url("/payments"))
            .bearer_auth(&self.config.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EstateError::Gateway(format!("Checkout request failed: {}", e)))?;

        let http_status = response.status();
        let envelope: Envelope<CheckoutData> = response
            .json()
            .await
            .map_err(|e| EstateError::Gateway(format!("Invalid checkout response: {}", e)))?;

        match envelope.data {
            Some(data) if http_status.is_success() && envelope.status == "success" => Ok(data.link),
            _ => Err(EstateError::Gateway(format!(
                "Checkout rejected ({}): {}",
                http_status,
                envelope.message.unwrap_or_default()
            ))),
        }
    }

    async fn verify(&self, tx_ref: &str) -> EstateResult<GatewayVerification> {
        let response = self
            .http_client
            .get(self.url("/transactions/verify_by_reference"))
            .bearer_auth(&self.config.secret_key)
            .query(&[("tx_ref", tx_ref)])
            .send()
            .await
            .map_err(|e| EstateError::Gateway(format!("Verification request failed: {}", e)))?;

        let http_status = response.status();
        if http_status.is_server_error() {
            return Err(EstateError::Gateway(format!(
                "Gateway returned error: {}",
                http_status
            )));
        }

        let envelope: Envelope<TransactionData> = response
            .json()
            .await
            .map_err(|e| EstateError::Gateway(format!("Invalid verification response: {}", e)))?;

        match envelope.data {
            Some(data) => Ok(GatewayVerification {
                status: parse_status(&data.status),
                tx_ref: data.tx_ref,
                amount: data.amount,
                currency: data.currency,
                transaction_id: data.id.map(|id| id.to_string()),
            }),
            // Unknown reference: the customer never completed checkout
            None if http_status.is_client_error() => Ok(GatewayVerification {
                status: GatewayStatus::Pending,
                tx_ref: tx_ref.to_string(),
                amount: 0.0,
                currency: String::new(),
                transaction_id: None,
            }),
            None => Err(EstateError::Gateway(format!(
                "Verification returned no data: {}",
                envelope.message.unwrap_or_default()
            ))),
        }
    }
}
