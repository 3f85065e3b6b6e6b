/// Gate-side code verification
use super::{
    normalize_code, EntryListingRow, VerificationStatus, VerifyOutcome, VisitorEntry,
    VisitorToken, VisitorTokenManager, ENTRY_SELECT, TOKEN_COLUMNS,
};
use crate::{
    db::models::VisitorTokenRow,
    error::{EstateError, EstateResult},
};
use chrono::Utc;

impl VisitorTokenManager {
    /// Look up a code and report what the guard may do with it.
    ///
    /// An expired token with an open visit is still reported so the visitor
    /// can be checked out; an expired token that was never granted is not.
    pub async fn verify_token(&self, code: &str) -> EstateResult<VerifyOutcome> {
        let code = normalize_code(code);
        let token = self
            .find_token(&code)
            .await?
            .ok_or_else(|| EstateError::NotFound("Invalid token code".to_string()))?;

        let entry = self.entry_for_token(token.id).await?;
        let now = Utc::now();

        let (status, is_valid, is_granted) = match &entry {
            Some(e) if e.exited_at.is_some() => (VerificationStatus::Exited, false, true),
            Some(_) if now >= token.expires_at => (VerificationStatus::ExpiredActive, true, true),
            Some(_) => (VerificationStatus::Active, true, true),
            None if token.used => (VerificationStatus::Used, false, false),
            None if now >= token.expires_at => {
                tracing::debug!(token_code = %code, "Verification of expired token");
                return Err(EstateError::Expired("Token has expired".to_string()));
            }
            None => (VerificationStatus::Valid, true, false),
        };

        let issuer = self.issuer_info(&token.issuer_id).await?;

        Ok(VerifyOutcome {
            status,
            is_valid,
            is_granted,
            token,
            issuer,
            entry,
        })
    }

    pub(super) async fn find_token(&self, code: &str) -> EstateResult<Option<VisitorToken>> {
        let row: Option<VisitorTokenRow> = sqlx::query_as(&format!(
            "SELECT {} FROM visitor_tokens WHERE code = ?1",
            TOKEN_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        row.map(VisitorToken::try_from).transpose()
    }

    pub(super) async fn entry_for_token(&self, token_id: i64) -> EstateResult<Option<VisitorEntry>> {
        let row: Option<EntryListingRow> =
            sqlx::query_as(&format!("{} WHERE e.token_id = ?1", ENTRY_SELECT))
                .bind(token_id)
                .fetch_optional(&self.db)
                .await?;

        Ok(row.map(VisitorEntry::from))
    }
}
