/// Registration one-time passwords
///
/// Codes are six decimal digits, stored only as SHA-256 digests, one pending
/// code per e-mail address. Requesting a new code replaces the old one.
use crate::{
    config::RegistrationConfig,
    db::models::RegistrationOtp,
    error::{EstateError, EstateResult},
    metrics,
};
use chrono::{Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// OTP manager
#[derive(Clone)]
pub struct OtpManager {
    db: SqlitePool,
    config: RegistrationConfig,
}

impl OtpManager {
    pub fn new(db: SqlitePool, config: RegistrationConfig) -> Self {
        Self { db, config }
    }

    /// Generate a six digit code
    pub fn generate_code() -> String {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{:06}", n)
    }

    fn digest(email: &str, code: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(email.as_bytes());
        hasher.update(b":");
        hasher.update(code.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Issue a fresh code for an e-mail, returning the plain code for delivery
    pub async fn issue(&self, email: &str) -> EstateResult<String> {
        let email = normalize_email(email);
        let code = Self::generate_code();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.otp_ttl);

        sqlx::query(
            r#"
            INSERT INTO registration_otps (email, code_hash, attempts, used, created_at, expires_at)
            VALUES (?1, ?2, 0, 0, ?3, ?4)
            ON CONFLICT(email) DO UPDATE SET
                code_hash = excluded.code_hash,
                attempts = 0,
                used = 0,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&email)
        .bind(Self::digest(&email, &code))
        .bind(now)
        .bind(expires_at)
        .execute(&self.db)
        .await?;

        metrics::OTPS_ISSUED_TOTAL.inc();
        tracing::debug!(email = %email, "Issued registration OTP");
        Ok(code)
    }

    /// Check a code and consume it on success.
    ///
    /// Every failed check counts against the attempt budget.
    pub async fn verify(&self, email: &str, code: &str) -> EstateResult<()> {
        let email = normalize_email(email);

        let otp: RegistrationOtp = sqlx::query_as(
            "SELECT email, code_hash, attempts, used, created_at, expires_at
             FROM registration_otps WHERE email = ?1",
        )
        .bind(&email)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| EstateError::Validation("No OTP was requested for this e-mail".to_string()))?;

        if otp.used {
            return Err(EstateError::Validation("OTP has already been used".to_string()));
        }

        if otp.attempts >= self.config.otp_max_attempts {
            return Err(EstateError::Validation(
                "Too many failed attempts, request a new OTP".to_string(),
            ));
        }

        if Utc::now() >= otp.expires_at {
            return Err(EstateError::Expired("OTP has expired".to_string()));
        }

        if Self::digest(&email, code.trim()) != otp.code_hash {
            sqlx::query("UPDATE registration_otps SET attempts = attempts + 1 WHERE email = ?1")
                .bind(&email)
                .execute(&self.db)
                .await?;
            tracing::warn!(email = %email, attempts = otp.attempts + 1, "Invalid registration OTP");
            return Err(EstateError::Validation("Invalid OTP".to_string()));
        }

        let result = sqlx::query("UPDATE registration_otps SET used = 1 WHERE email = ?1 AND used = 0")
            .bind(&email)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(EstateError::Conflict("OTP has already been used".to_string()));
        }

        Ok(())
    }

    /// Remove expired and consumed codes
    pub async fn cleanup_expired(&self) -> EstateResult<u64> {
        let result = sqlx::query("DELETE FROM registration_otps WHERE expires_at < ?1 OR used = 1")
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
