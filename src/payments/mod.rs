/// Subscription payments
///
/// Payments move pending -> paid when the gateway confirms them. Settlement
/// creates the subscription window and refreshes the payer's standing in one
/// transaction.

mod gateway;
mod manager;
pub mod standing;

pub use gateway::{
    CheckoutRequest, FlutterwaveGateway, GatewayStatus, GatewayVerification, PaymentGateway,
};
pub use manager::{PaymentManager, PaymentStats};

#[cfg(test)]
pub(crate) use gateway::tests::FakeGateway;

use crate::{
    db::models::{PaymentRow, SubscriptionRow},
    error::{EstateError, EstateResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Answers whether a user's account is payment-current
#[async_trait]
pub trait SubscriptionStatusProvider: Send + Sync {
    async fn is_subscription_active(&self, user_id: &str) -> EstateResult<bool>;
}

/// Who the package is priced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Landlord,
    Resident,
}

impl PackageType {
    pub const ALL: [PackageType; 2] = [PackageType::Landlord, PackageType::Resident];

    pub fn as_str(&self) -> &'static str {
        match self {
            PackageType::Landlord => "landlord",
            PackageType::Resident => "resident",
        }
    }

    pub fn from_str(s: &str) -> EstateResult<Self> {
        match s {
            "landlord" => Ok(PackageType::Landlord),
            "resident" => Ok(PackageType::Resident),
            _ => Err(EstateError::Validation(format!("Invalid package type: {}", s))),
        }
    }
}

/// Billing period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "monthly")]
    Monthly,
    #[serde(rename = "6months")]
    SixMonths,
    #[serde(rename = "yearly")]
    Yearly,
}

impl Period {
    pub const ALL: [Period; 3] = [Period::Monthly, Period::SixMonths, Period::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Monthly => "monthly",
            Period::SixMonths => "6months",
            Period::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> EstateResult<Self> {
        match s {
            "monthly" => Ok(Period::Monthly),
            "6months" => Ok(Period::SixMonths),
            "yearly" => Ok(Period::Yearly),
            _ => Err(EstateError::Validation(format!("Invalid period: {}", s))),
        }
    }

    /// Month-units covered by one payment
    pub fn months(&self) -> u32 {
        match self {
            Period::Monthly => 1,
            Period::SixMonths => 6,
            Period::Yearly => 12,
        }
    }
}

/// Payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Abandoned,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> EstateResult<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "abandoned" => Ok(PaymentStatus::Abandoned),
            _ => Err(EstateError::Internal(format!("Unknown payment status: {}", s))),
        }
    }
}

/// Catalogue entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub package_type: PackageType,
    pub period: Period,
    pub months: u32,
    pub amount: i64,
    pub currency: String,
}

/// Priced catalogue: every package type for every period
pub fn packages(monthly_price: i64, currency: &str) -> Vec<Package> {
    PackageType::ALL
        .iter()
        .flat_map(|package_type| {
            Period::ALL.iter().map(move |period| Package {
                package_type: *package_type,
                period: *period,
                months: period.months(),
                amount: monthly_price * i64::from(period.months()),
                currency: currency.to_string(),
            })
        })
        .collect()
}

/// Payment initialization request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InitializePaymentRequest {
    pub package_type: PackageType,
    pub period: Period,
    #[validate(range(min = 1, message = "Amount must be positive"))]
    pub amount: i64,
    #[validate(length(max = 64, message = "Plan id is too long"))]
    pub plan_id: Option<String>,
}

/// Result of initializing a payment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializedPayment {
    pub tx_ref: String,
    pub amount: i64,
    pub currency: String,
    /// Hosted checkout page, when a gateway is configured
    pub checkout_link: Option<String>,
}

/// Payment as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    pub user_id: String,
    pub tx_ref: String,
    pub package_type: PackageType,
    pub period: Period,
    pub amount: i64,
    pub currency: String,
    pub plan_id: Option<String>,
    pub status: PaymentStatus,
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = EstateError;

    fn try_from(row: PaymentRow) -> EstateResult<Self> {
        Ok(Self {
            id: row.id,
            package_type: PackageType::from_str(&row.package_type)?,
            period: Period::from_str(&row.period)?,
            status: PaymentStatus::from_str(&row.status)?,
            user_id: row.user_id,
            tx_ref: row.tx_ref,
            amount: row.amount,
            currency: row.currency,
            plan_id: row.plan_id,
            gateway_transaction_id: row.gateway_transaction_id,
            created_at: row.created_at,
            paid_at: row.paid_at,
        })
    }
}

/// Subscription window as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub payment_id: i64,
    pub package_type: PackageType,
    pub period: Period,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = EstateError;

    fn try_from(row: SubscriptionRow) -> EstateResult<Self> {
        Ok(Self {
            id: row.id,
            package_type: PackageType::from_str(&row.package_type)?,
            period: Period::from_str(&row.period)?,
            user_id: row.user_id,
            payment_id: row.payment_id,
            status: row.status,
            starts_at: row.starts_at,
            expires_at: row.expires_at,
            created_at: row.created_at,
        })
    }
}

/// Outcome of verifying a payment with the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub payment: Payment,
    pub subscription: Option<Subscription>,
    pub standing: Option<standing::Standing>,
}

/// Subscription gate view for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatusView {
    pub active: bool,
    pub subscription: Option<Subscription>,
    pub standing: standing::Standing,
}
