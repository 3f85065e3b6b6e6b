/// Database row models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub house_number: Option<String>,
    pub role: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub payment_count: i64,
    pub is_up_to_date: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Session record in the database
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub access_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Pending registration OTP
#[derive(Debug, Clone, FromRow)]
pub struct RegistrationOtp {
    pub email: String,
    pub code_hash: String,
    pub attempts: i64,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Visitor token record
#[derive(Debug, Clone, FromRow)]
pub struct VisitorTokenRow {
    pub id: i64,
    pub code: String,
    pub issuer_id: String,
    pub visitor_name: String,
    pub visitor_phone: Option<String>,
    pub stay_type: String,
    pub duration: i64,
    pub note: Option<String>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Guard-recorded visit
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct VisitorEntryRow {
    pub id: i64,
    pub token_id: i64,
    pub visitor_name: String,
    pub visitor_phone: Option<String>,
    pub issuer_id: String,
    pub guard_id: String,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_guard_id: Option<String>,
    pub entry_note: Option<String>,
    pub exit_note: Option<String>,
}

/// Payment record
#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: i64,
    pub user_id: String,
    pub tx_ref: String,
    pub package_type: String,
    pub period: String,
    pub amount: i64,
    pub currency: String,
    pub plan_id: Option<String>,
    pub status: String,
    pub gateway_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Subscription record
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: i64,
    pub user_id: String,
    pub payment_id: i64,
    pub package_type: String,
    pub period: String,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
