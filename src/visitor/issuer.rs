/// Token issuing and issuer-side listings
use super::{
    clean_optional, EntryListingRow, GenerateTokenRequest, IssuerInfo, TokenState, TokenSummary,
    VisitorEntry, VisitorToken, VisitorTokenManager, ENTRY_SELECT, TOKEN_COLUMNS,
};
use crate::{
    account::{Capability, Role},
    db::models::VisitorTokenRow,
    error::{EstateError, EstateResult},
    metrics,
};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;

/// Unambiguous upper-case alphabet (no 0/O, 1/I)
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;
const MAX_CODE_ATTEMPTS: usize = 5;

impl VisitorTokenManager {
    /// Generate a new opaque token code
    pub fn generate_code() -> String {
        let mut rng = rand::thread_rng();
        (0..CODE_LENGTH)
            .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
            .collect()
    }

    /// Issue a token for a visitor.
    ///
    /// Issuers need an active subscription unless their role bypasses it.
    pub async fn generate_token(
        &self,
        issuer_id: &str,
        role: Role,
        request: GenerateTokenRequest,
    ) -> EstateResult<VisitorToken> {
        if !role.has(Capability::IssueTokens) {
            return Err(EstateError::Authorization(format!(
                "Role {} cannot issue visitor tokens",
                role
            )));
        }

        let visitor_name = request.visitor_name.trim().to_string();
        if visitor_name.is_empty() {
            return Err(EstateError::Validation("Visitor name is required".to_string()));
        }
        let window = request.stay_type.window(request.duration)?;

        if !role.has(Capability::BypassSubscription)
            && !self.subscriptions.is_subscription_active(issuer_id).await?
        {
            tracing::info!(issuer_id, "Token generation refused: no active subscription");
            return Err(EstateError::SubscriptionRequired(
                "An active subscription is required to generate visitor tokens".to_string(),
            ));
        }

        let visitor_phone = clean_optional(request.visitor_phone);
        let note = clean_optional(request.note);
        let created_at = Utc::now();
        let expires_at = created_at + window;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = Self::generate_code();

            let result = sqlx::query(
                r#"
                INSERT INTO visitor_tokens
                    (code, issuer_id, visitor_name, visitor_phone, stay_type, duration, note,
                     used, created_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)
                "#,
            )
            .bind(&code)
            .bind(issuer_id)
            .bind(&visitor_name)
            .bind(&visitor_phone)
            .bind(request.stay_type.as_str())
            .bind(request.duration)
            .bind(&note)
            .bind(created_at)
            .bind(expires_at)
            .execute(&self.db)
            .await;

            match result {
                Ok(done) => {
                    tracing::info!(
                        issuer_id,
                        token_code = %code,
                        stay_type = request.stay_type.as_str(),
                        duration = request.duration,
                        "Issued visitor token"
                    );
                    metrics::TOKENS_ISSUED_TOTAL
                        .with_label_values(&[request.stay_type.as_str()])
                        .inc();

                    return Ok(VisitorToken {
                        id: done.last_insert_rowid(),
                        code,
                        issuer_id: issuer_id.to_string(),
                        visitor_name,
                        visitor_phone,
                        stay_type: request.stay_type,
                        duration: request.duration,
                        note,
                        used: false,
                        created_at,
                        expires_at,
                    });
                }
                Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                    tracing::debug!(attempt, "Token code collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EstateError::Internal(
            "Could not allocate a unique token code".to_string(),
        ))
    }

    /// Tokens issued by a user, newest first, with their derived state
    pub async fn my_tokens(&self, issuer_id: &str, limit: i64) -> EstateResult<Vec<TokenSummary>> {
        let rows: Vec<VisitorTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM visitor_tokens WHERE issuer_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            TOKEN_COLUMNS
        ))
        .bind(issuer_id)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.db)
        .await?;

        let entries: Vec<EntryListingRow> =
            sqlx::query_as(&format!("{} WHERE e.issuer_id = ?1", ENTRY_SELECT))
                .bind(issuer_id)
                .fetch_all(&self.db)
                .await?;
        let mut by_token: HashMap<i64, VisitorEntry> = entries
            .into_iter()
            .map(|row| {
                let entry = VisitorEntry::from(row);
                (entry.token_id, entry)
            })
            .collect();

        let now = Utc::now();
        rows.into_iter()
            .map(|row| {
                let token = VisitorToken::try_from(row)?;
                let entry = by_token.remove(&token.id);
                let state = match &entry {
                    Some(e) if e.exited_at.is_some() => TokenState::Exited,
                    Some(_) => TokenState::OnPremises,
                    None if token.used => TokenState::Used,
                    None if now >= token.expires_at => TokenState::Expired,
                    None => TokenState::Active,
                };
                Ok(TokenSummary { state, token, entry })
            })
            .collect()
    }

    /// Contact details of a token's issuer
    pub(super) async fn issuer_info(&self, issuer_id: &str) -> EstateResult<Option<IssuerInfo>> {
        let issuer = sqlx::query_as::<_, IssuerInfo>(
            "SELECT id, name, email, phone, house_number FROM users WHERE id = ?1",
        )
        .bind(issuer_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(issuer)
    }
}
