/// Account management system
///
/// Handles OTP-gated registration, password login, sessions, and the
/// per-user payment counters that back the subscription gate.

mod manager;
mod otp;
mod roles;

pub use manager::AccountManager;
pub use otp::OtpManager;
pub use roles::{Capability, Role};

use crate::db::models::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Registration OTP request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RequestOtpRequest {
    #[validate(email(message = "A valid e-mail address is required"))]
    pub email: String,
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[validate(email(message = "A valid e-mail address is required"))]
    pub email: String,
    #[validate(length(equal = 6, message = "OTP must be 6 digits"))]
    pub otp: String,
    #[validate(length(min = 1, max = 120, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: String,
    pub phone: Option<String>,
    pub house_number: Option<String>,
}

/// Validated registration input handed to the account manager
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
    pub house_number: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "A valid e-mail address is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Session response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

/// Public view of a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub house_number: Option<String>,
    pub role: Role,
    pub capabilities: Vec<Capability>,
    pub payment_count: i64,
    pub is_up_to_date: bool,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn from_user(user: &User) -> crate::error::EstateResult<Self> {
        let role = Role::from_str(&user.role)?;
        Ok(Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone(),
            house_number: user.house_number.clone(),
            role,
            capabilities: role.capabilities().to_vec(),
            payment_count: user.payment_count,
            is_up_to_date: user.is_up_to_date,
            created_at: user.created_at,
        })
    }
}

/// Validated session from bearer token
#[derive(Debug, Clone)]
pub struct ValidatedSession {
    pub user_id: String,
    pub session_id: String,
}
