/// Visitor access tokens
///
/// A resident or landlord issues a time-bounded, single-use code for a named
/// visitor. Security verifies the code at the gate, grants entry (consuming
/// the token) and later records the exit. Per token the lifecycle is
/// Issued -> Granted -> Exited with no way back.

mod issuer;
mod notify;
mod recorder;
mod verifier;

pub use notify::{VisitEvent, VisitNotifier};
pub use recorder::ExitTarget;

use crate::{
    db::models::VisitorTokenRow,
    error::{EstateError, EstateResult},
    payments::SubscriptionStatusProvider,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use validator::Validate;

/// Hours allowed for a short stay
pub const SHORT_STAY_HOURS: [i64; 5] = [1, 2, 4, 6, 12];
/// Days allowed for a long stay
pub const LONG_STAY_DAYS: [i64; 5] = [1, 2, 3, 5, 7];

/// Stay category; decides whether the duration is counted in hours or days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StayType {
    Short,
    Long,
}

impl StayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StayType::Short => "short",
            StayType::Long => "long",
        }
    }

    pub fn from_str(s: &str) -> EstateResult<Self> {
        match s {
            "short" => Ok(StayType::Short),
            "long" => Ok(StayType::Long),
            _ => Err(EstateError::Validation(format!("Invalid stay type: {}", s))),
        }
    }

    /// Validity window for `units` of this stay type
    pub fn window(&self, units: i64) -> EstateResult<Duration> {
        match self {
            StayType::Short if SHORT_STAY_HOURS.contains(&units) => Ok(Duration::hours(units)),
            StayType::Long if LONG_STAY_DAYS.contains(&units) => Ok(Duration::days(units)),
            StayType::Short => Err(EstateError::Validation(format!(
                "Short stay duration must be one of {:?} hours",
                SHORT_STAY_HOURS
            ))),
            StayType::Long => Err(EstateError::Validation(format!(
                "Long stay duration must be one of {:?} days",
                LONG_STAY_DAYS
            ))),
        }
    }
}

/// Token generation request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTokenRequest {
    #[validate(length(max = 120, message = "Visitor name is too long"))]
    pub visitor_name: String,
    #[validate(length(max = 32, message = "Visitor phone is too long"))]
    pub visitor_phone: Option<String>,
    #[serde(rename = "type", alias = "stayType")]
    pub stay_type: StayType,
    pub duration: i64,
    #[validate(length(max = 500, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Code lookup request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VerifyTokenRequest {
    #[validate(length(min = 1, max = 32, message = "Token code is required"))]
    pub code: String,
}

/// Grant entry request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GrantEntryRequest {
    #[validate(length(min = 1, max = 32, message = "Token code is required"))]
    pub code: String,
    #[validate(length(max = 500, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Exit request; either the entry id or the token code identifies the visit
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExitVisitorRequest {
    pub entry_id: Option<i64>,
    pub code: Option<String>,
    #[validate(length(max = 500, message = "Note is too long"))]
    pub note: Option<String>,
}

/// Issued token as returned to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorToken {
    pub id: i64,
    pub code: String,
    pub issuer_id: String,
    pub visitor_name: String,
    pub visitor_phone: Option<String>,
    pub stay_type: StayType,
    pub duration: i64,
    pub note: Option<String>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<VisitorTokenRow> for VisitorToken {
    type Error = EstateError;

    fn try_from(row: VisitorTokenRow) -> EstateResult<Self> {
        Ok(Self {
            id: row.id,
            stay_type: StayType::from_str(&row.stay_type)?,
            code: row.code,
            issuer_id: row.issuer_id,
            visitor_name: row.visitor_name,
            visitor_phone: row.visitor_phone,
            duration: row.duration,
            note: row.note,
            used: row.used,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Who issued a token
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IssuerInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub email: String,
    pub phone: Option<String>,
    pub house_number: Option<String>,
}

/// A recorded visit joined with token, issuer and guard details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorEntry {
    pub id: i64,
    pub token_id: i64,
    pub token_code: String,
    pub visitor_name: String,
    pub visitor_phone: Option<String>,
    pub issuer_id: String,
    pub issuer_name: Option<String>,
    pub issuer_house_number: Option<String>,
    pub guard_id: String,
    pub guard_name: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub exit_guard_id: Option<String>,
    pub entry_note: Option<String>,
    pub exit_note: Option<String>,
    /// Whole minutes on premises, once exited
    pub duration_minutes: Option<i64>,
}

/// Verification status of a code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Unused and within its window; grant entry is the next action
    Valid,
    /// Granted, visitor on premises
    Active,
    /// Granted, visitor still on premises past the token's expiry
    ExpiredActive,
    /// Visit closed
    Exited,
    /// Marked used without a recorded visit
    Used,
}

/// Result of verifying a code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub status: VerificationStatus,
    pub is_valid: bool,
    pub is_granted: bool,
    pub token: VisitorToken,
    pub issuer: Option<IssuerInfo>,
    pub entry: Option<VisitorEntry>,
}

/// Derived state of a token in issuer listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    Expired,
    Used,
    OnPremises,
    Exited,
}

/// Issuer-facing token listing item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub state: TokenState,
    pub token: VisitorToken,
    pub entry: Option<VisitorEntry>,
}

/// Result of recording an exit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitOutcome {
    pub entry: VisitorEntry,
    pub duration_minutes: i64,
}

/// Visitor token manager: issuing, verification, entry and exit recording
#[derive(Clone)]
pub struct VisitorTokenManager {
    db: SqlitePool,
    subscriptions: Arc<dyn SubscriptionStatusProvider>,
    notifier: Arc<dyn VisitNotifier>,
}

impl VisitorTokenManager {
    pub fn new(
        db: SqlitePool,
        subscriptions: Arc<dyn SubscriptionStatusProvider>,
        notifier: Arc<dyn VisitNotifier>,
    ) -> Self {
        Self {
            db,
            subscriptions,
            notifier,
        }
    }

    /// Count tokens and currently open visits
    pub async fn stats(&self) -> EstateResult<(i64, i64)> {
        let tokens: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM visitor_tokens")
            .fetch_one(&self.db)
            .await?;
        let on_premises: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM visitor_entries WHERE exited_at IS NULL")
                .fetch_one(&self.db)
                .await?;

        Ok((tokens, on_premises))
    }
}

pub(crate) const TOKEN_COLUMNS: &str = "id, code, issuer_id, visitor_name, visitor_phone, stay_type,
    duration, note, used, created_at, expires_at";

pub(crate) const ENTRY_SELECT: &str = r#"
    SELECT e.id, e.token_id, t.code AS token_code, e.visitor_name, e.visitor_phone,
           e.issuer_id, u.name AS issuer_name, u.house_number AS issuer_house_number,
           e.guard_id, g.name AS guard_name, e.entered_at, e.exited_at, e.exit_guard_id,
           e.entry_note, e.exit_note
    FROM visitor_entries e
    JOIN visitor_tokens t ON t.id = e.token_id
    LEFT JOIN users u ON u.id = e.issuer_id
    LEFT JOIN users g ON g.id = e.guard_id
"#;

/// Row shape produced by `ENTRY_SELECT`
#[derive(Debug, Clone, FromRow)]
pub(crate) struct EntryListingRow {
    id: i64,
    token_id: i64,
    token_code: String,
    visitor_name: String,
    visitor_phone: Option<String>,
    issuer_id: String,
    issuer_name: Option<String>,
    issuer_house_number: Option<String>,
    guard_id: String,
    guard_name: Option<String>,
    entered_at: DateTime<Utc>,
    exited_at: Option<DateTime<Utc>>,
    exit_guard_id: Option<String>,
    entry_note: Option<String>,
    exit_note: Option<String>,
}

impl From<EntryListingRow> for VisitorEntry {
    fn from(row: EntryListingRow) -> Self {
        let duration_minutes = row
            .exited_at
            .map(|exited| (exited - row.entered_at).num_minutes());

        Self {
            id: row.id,
            token_id: row.token_id,
            token_code: row.token_code,
            visitor_name: row.visitor_name,
            visitor_phone: row.visitor_phone,
            issuer_id: row.issuer_id,
            issuer_name: row.issuer_name,
            issuer_house_number: row.issuer_house_number,
            guard_id: row.guard_id,
            guard_name: row.guard_name,
            entered_at: row.entered_at,
            exited_at: row.exited_at,
            exit_guard_id: row.exit_guard_id,
            entry_note: row.entry_note,
            exit_note: row.exit_note,
            duration_minutes,
        }
    }
}

/// Canonical form of a user-typed code
pub(crate) fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub(crate) fn clean_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, NewUser, Role},
        config::test_config,
        db::test_pool,
        payments::SubscriptionStatusProvider,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Subscription provider with a switchable answer
    pub(crate) struct FixedSubscriptions(pub AtomicBool);

    #[async_trait]
    impl SubscriptionStatusProvider for FixedSubscriptions {
        async fn is_subscription_active(&self, _user_id: &str) -> EstateResult<bool> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    /// Notifier that records events and optionally fails
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub events: Mutex<Vec<VisitEvent>>,
        pub fail: bool,
    }

    #[async_trait]
    impl VisitNotifier for RecordingNotifier {
        async fn notify(&self, _issuer: &IssuerInfo, event: VisitEvent) -> EstateResult<()> {
            self.events.lock().unwrap().push(event);
            if self.fail {
                return Err(EstateError::Internal("smtp down".to_string()));
            }
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub db: SqlitePool,
        pub manager: VisitorTokenManager,
        pub subscribed: Arc<FixedSubscriptions>,
        pub notifier: Arc<RecordingNotifier>,
        pub resident: String,
        pub guard: String,
    }

    pub(crate) async fn fixture_with(fail_notifications: bool) -> Fixture {
        fixture_on(test_pool().await, fail_notifications).await
    }

    pub(crate) async fn fixture_on(db: SqlitePool, fail_notifications: bool) -> Fixture {
        let accounts = AccountManager::new(db.clone(), Arc::new(test_config()));

        let make = |email: &str, role: Role| NewUser {
            email: email.to_string(),
            name: format!("{} user", role),
            password: "password123".to_string(),
            role,
            phone: None,
            house_number: Some("A1".to_string()),
        };
        let resident = accounts
            .create_user(make("resident@estate.test", Role::Resident))
            .await
            .unwrap();
        let guard = accounts
            .create_user(make("guard@estate.test", Role::Security))
            .await
            .unwrap();

        let subscribed = Arc::new(FixedSubscriptions(AtomicBool::new(true)));
        let notifier = Arc::new(RecordingNotifier {
            events: Mutex::new(Vec::new()),
            fail: fail_notifications,
        });
        let manager = VisitorTokenManager::new(db.clone(), subscribed.clone(), notifier.clone());

        Fixture {
            db,
            manager,
            subscribed,
            notifier,
            resident: resident.id,
            guard: guard.id,
        }
    }

    pub(crate) async fn fixture() -> Fixture {
        fixture_with(false).await
    }

    pub(crate) fn short_visit(name: &str, hours: i64) -> GenerateTokenRequest {
        GenerateTokenRequest {
            visitor_name: name.to_string(),
            visitor_phone: Some("+2348011112222".to_string()),
            stay_type: StayType::Short,
            duration: hours,
            note: Some("Bringing a parcel".to_string()),
        }
    }

    /// Shift a token's timestamps into the past
    pub(crate) async fn backdate_token(db: &SqlitePool, code: &str, by: Duration) {
        let (created_at, expires_at): (DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            "SELECT created_at, expires_at FROM visitor_tokens WHERE code = ?1",
        )
        .bind(code)
        .fetch_one(db)
        .await
        .unwrap();
        sqlx::query("UPDATE visitor_tokens SET created_at = ?1, expires_at = ?2 WHERE code = ?3")
            .bind(created_at - by)
            .bind(expires_at - by)
            .bind(code)
            .execute(db)
            .await
            .unwrap();
    }

    #[test]
    fn test_stay_windows() {
        for hours in SHORT_STAY_HOURS {
            assert_eq!(StayType::Short.window(hours).unwrap(), Duration::hours(hours));
        }
        for days in LONG_STAY_DAYS {
            assert_eq!(StayType::Long.window(days).unwrap(), Duration::days(days));
        }
        assert!(StayType::Short.window(3).is_err());
        assert!(StayType::Short.window(0).is_err());
        assert!(StayType::Long.window(4).is_err());
        assert!(StayType::Long.window(-1).is_err());
    }

    #[test]
    fn test_generate_request_accepts_type_field() {
        let req: GenerateTokenRequest = serde_json::from_str(
            r#"{"visitorName":"Chidi","type":"long","duration":3}"#,
        )
        .unwrap();
        assert_eq!(req.stay_type, StayType::Long);
        assert_eq!(req.duration, 3);
        assert!(req.visitor_phone.is_none());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  ab12cd34 "), "AB12CD34");
    }
}
